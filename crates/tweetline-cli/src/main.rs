//! tweetline - land and filter date-partitioned tweet archives
//!
//! `land` stores stdin NDJSON messages one object each under today's
//! partition; `filter` merges one partition into a cleaned NDJSON object.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "tweetline")]
#[command(about = "Land and filter date-partitioned tweet archives")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./tweetline.toml or ~/.config/tweetline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Merge one day's partition into a single cleaned NDJSON object
    Filter(cmd::filter::FilterArgs),
    /// Land stdin NDJSON messages, one object per message
    Land(cmd::land::LandArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(tweetline_core::ProgressContext::new());
    let multi = progress.is_tty().then(|| progress.multi());
    tweetline_core::init_logging(cli.quiet, cli.debug, multi);

    let loaded = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(cmd::EXIT_CONFIG);
        }
    };

    match cli.command {
        Command::Filter(args) => cmd::filter::run(args, &config, &progress),
        Command::Land(args) => cmd::land::run(args, &config, &progress),
        Command::Config => {
            print_config(&config);
            ExitCode::SUCCESS
        }
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let store = &config.store;
    table.add_row(vec!["Store backend", &store.backend.to_string()]);
    table.add_row(vec!["Local root", &store.root.display().to_string()]);
    table.add_row(vec!["Endpoint", &store.endpoint]);
    table.add_row(vec!["Bucket", &store.bucket]);
    table.add_row(vec![
        "Token",
        if store.token.is_some() {
            "configured"
        } else {
            "not set"
        },
    ]);
    table.add_row(vec!["List page size", &store.page_size.to_string()]);

    let filter = &config.filter;
    table.add_row(vec!["Input folder", &filter.input_folder]);
    table.add_row(vec!["Output folder", &filter.output_folder]);
    table.add_row(vec!["Workers", &filter.workers.to_string()]);
    table.add_row(vec!["Read timeout", &format!("{}s", filter.read_timeout)]);
    table.add_row(vec!["Filter progress", &format!("{}s", filter.progress_secs)]);

    let land = &config.land;
    table.add_row(vec!["Land folder", &land.folder]);
    table.add_row(vec!["Messages folder", &land.messages_folder]);
    table.add_row(vec!["Land progress", &format!("{}s", land.progress_secs)]);

    eprintln!("\n{table}");
}
