//! Filter subcommand - merge one day's partition into a cleaned NDJSON object

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Args;
use tweetline_core::{SharedProgress, Shutdown, listen_for_signals};
use tweetline_filter::{FilterConfig, RunOutcome};

use super::{EXIT_CONFIG, EXIT_FAILURE, Store, parse_date, runtime};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct FilterArgs {
    /// Partition to filter (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub ingest_date: NaiveDate,

    /// Folder holding the landed `dt=<date>/` partitions
    #[arg(long)]
    pub input_folder: Option<String>,

    /// Folder receiving `<date>.jsonl`
    #[arg(long)]
    pub output_folder: Option<String>,

    /// Bucket to read from and write to
    #[arg(long)]
    pub bucket: Option<String>,

    /// Number of concurrent fetches
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Per-object deadline in seconds
    #[arg(long)]
    pub read_timeout: Option<u64>,
}

impl FilterArgs {
    /// Flags over config file values over defaults.
    pub fn to_config(&self, config: &Config) -> FilterConfig {
        let section = &config.filter;
        FilterConfig {
            input_folder: self
                .input_folder
                .clone()
                .unwrap_or_else(|| section.input_folder.clone()),
            output_folder: self
                .output_folder
                .clone()
                .unwrap_or_else(|| section.output_folder.clone()),
            ingest_date: self.ingest_date,
            workers: self.workers.unwrap_or(section.workers),
            read_timeout: Duration::from_secs(self.read_timeout.unwrap_or(section.read_timeout)),
            progress_period: Duration::from_secs(section.progress_secs),
        }
    }
}

pub fn run(args: FilterArgs, config: &Config, progress: &SharedProgress) -> ExitCode {
    let filter_config = args.to_config(config);
    if let Err(e) = filter_config.validate() {
        eprintln!("Error: {e:#}");
        return ExitCode::from(EXIT_CONFIG);
    }
    let store = match Store::open(&config.store, args.bucket.as_deref()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    log::debug!("Using store {}", store.describe());

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
        let token = shutdown.token();
        let result = match store {
            Store::Local(s) => {
                tweetline_filter::run(Arc::new(s), &filter_config, token, progress).await
            }
            Store::Http(s) => {
                tweetline_filter::run(Arc::new(s), &filter_config, token, progress).await
            }
        };
        signals.abort();
        result
    });

    match result {
        Ok(summary) => match summary.outcome {
            RunOutcome::Fatal(_) => ExitCode::from(EXIT_FAILURE),
            RunOutcome::Success | RunOutcome::PartialFailure { .. } | RunOutcome::Cancelled => {
                ExitCode::SUCCESS
            }
        },
        Err(e) => {
            log::error!("Filter failed: {e:#}");
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
        args: FilterArgs,
    }

    #[test]
    fn ingest_date_is_required() {
        assert!(TestCli::try_parse_from(["t"]).is_err());
        assert!(TestCli::try_parse_from(["t", "--ingest-date", "2020-13-01"]).is_err());
    }

    #[test]
    fn flags_override_config() {
        let cli = TestCli::try_parse_from([
            "t",
            "--ingest-date",
            "2020-10-01",
            "--workers",
            "3",
            "--output-folder",
            "out",
        ])
        .unwrap();
        let mut config = Config::default();
        config.filter.read_timeout = 9;

        let fc = cli.args.to_config(&config);
        assert_eq!(fc.workers, 3);
        assert_eq!(fc.read_timeout, Duration::from_secs(9));
        assert_eq!(fc.input_folder, "tweets");
        assert_eq!(fc.output_key(), "out/2020-10-01.jsonl");
        assert_eq!(fc.prefix(), "tweets/dt=2020-10-01/");
    }

    #[test]
    fn empty_folder_fails_validation() {
        let cli = TestCli::try_parse_from([
            "t",
            "--ingest-date",
            "2020-10-01",
            "--input-folder",
            "",
        ])
        .unwrap();
        assert!(cli.args.to_config(&Config::default()).validate().is_err());
    }
}
