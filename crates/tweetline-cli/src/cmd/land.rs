//! Land subcommand - store stdin NDJSON messages, one object each

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Args;
use tokio::io::BufReader;
use tweetline_core::{SharedProgress, Shutdown, listen_for_signals};
use tweetline_filter::LandConfig;

use super::{EXIT_CONFIG, EXIT_FAILURE, Store, parse_date, runtime};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct LandArgs {
    /// Folder receiving tweets
    #[arg(long)]
    pub folder: Option<String>,

    /// Folder receiving other stream messages
    #[arg(long)]
    pub messages_folder: Option<String>,

    /// Bucket to write to
    #[arg(long)]
    pub bucket: Option<String>,

    /// Partition date instead of today (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub date: Option<NaiveDate>,
}

impl LandArgs {
    pub fn to_config(&self, config: &Config) -> LandConfig {
        let section = &config.land;
        LandConfig {
            folder: self.folder.clone().unwrap_or_else(|| section.folder.clone()),
            messages_folder: self
                .messages_folder
                .clone()
                .unwrap_or_else(|| section.messages_folder.clone()),
            date: self.date,
            progress_period: Duration::from_secs(section.progress_secs.max(1)),
        }
    }
}

pub fn run(args: LandArgs, config: &Config, progress: &SharedProgress) -> ExitCode {
    let land_config = args.to_config(config);
    if land_config.folder.trim_matches('/').is_empty()
        || land_config.messages_folder.trim_matches('/').is_empty()
    {
        eprintln!("Error: landing folders must not be empty");
        return ExitCode::from(EXIT_CONFIG);
    }
    let store = match Store::open(&config.store, args.bucket.as_deref()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let result = rt.block_on(async {
        let shutdown = Shutdown::new();
        let signals = listen_for_signals(shutdown.clone());
        let input = BufReader::new(tokio::io::stdin());
        let token = shutdown.token();
        let result = match store {
            Store::Local(s) => {
                tweetline_filter::land_lines(Arc::new(s), input, &land_config, token, progress).await
            }
            Store::Http(s) => {
                tweetline_filter::land_lines(Arc::new(s), input, &land_config, token, progress).await
            }
        };
        signals.abort();
        result
    });

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Landing failed: {e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: LandArgs,
    }

    #[test]
    fn defaults_come_from_config() {
        let cli = TestCli::try_parse_from(["t", "--date", "2020-10-01"]).unwrap();
        let lc = cli.args.to_config(&Config::default());
        assert_eq!(lc.folder, "tweets");
        assert_eq!(lc.messages_folder, "messages");
        assert_eq!(lc.progress_period, Duration::from_secs(60));
        assert_eq!(lc.date, NaiveDate::from_ymd_opt(2020, 10, 1));
    }
}
