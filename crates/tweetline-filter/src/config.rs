//! Filter run configuration

use std::time::Duration;

use chrono::NaiveDate;

/// Default number of concurrent fetches
pub const DEFAULT_WORKERS: usize = 20;
/// Default absolute deadline per object
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PROGRESS_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_INPUT_FOLDER: &str = "tweets";
pub const DEFAULT_OUTPUT_FOLDER: &str = "filtered-tweets";

/// Everything a filter run needs, passed explicitly into [`crate::run`].
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Folder holding the landed `dt=<date>/` partitions
    pub input_folder: String,
    /// Folder receiving `<date>.jsonl`
    pub output_folder: String,
    /// Partition to filter
    pub ingest_date: NaiveDate,
    pub workers: usize,
    pub read_timeout: Duration,
    /// Interval between progress lines
    pub progress_period: Duration,
}

impl FilterConfig {
    pub fn new(ingest_date: NaiveDate) -> Self {
        Self {
            input_folder: DEFAULT_INPUT_FOLDER.to_string(),
            output_folder: DEFAULT_OUTPUT_FOLDER.to_string(),
            ingest_date,
            workers: DEFAULT_WORKERS,
            read_timeout: DEFAULT_READ_TIMEOUT,
            progress_period: DEFAULT_PROGRESS_PERIOD,
        }
    }

    /// Listing prefix, e.g. `tweets/dt=2020-10-01/`.
    pub fn prefix(&self) -> String {
        format!(
            "{}/dt={}/",
            self.input_folder.trim_end_matches('/'),
            self.ingest_date.format("%Y-%m-%d")
        )
    }

    /// Output object key, e.g. `filtered-tweets/2020-10-01.jsonl`.
    pub fn output_key(&self) -> String {
        format!(
            "{}/{}.jsonl",
            self.output_folder.trim_end_matches('/'),
            self.ingest_date.format("%Y-%m-%d")
        )
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input_folder.trim_matches('/').is_empty() {
            anyhow::bail!("input folder must not be empty");
        }
        if self.output_folder.trim_matches('/').is_empty() {
            anyhow::bail!("output folder must not be empty");
        }
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.read_timeout.is_zero() {
            anyhow::bail!("read timeout must be positive");
        }
        if self.progress_period.is_zero() {
            anyhow::bail!("progress period must be positive");
        }
        Ok(())
    }
}

impl Default for FilterConfig {
    /// Today's partition (UTC) with default folders.
    fn default() -> Self {
        Self::new(chrono::Utc::now().date_naive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oct1() -> FilterConfig {
        FilterConfig::new(NaiveDate::from_ymd_opt(2020, 10, 1).unwrap())
    }

    #[test]
    fn default_values() {
        let config = oct1();
        assert_eq!(config.workers, 20);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.input_folder, "tweets");
        assert_eq!(config.output_folder, "filtered-tweets");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn prefix_and_output_key() {
        let config = oct1();
        assert_eq!(config.prefix(), "tweets/dt=2020-10-01/");
        assert_eq!(config.output_key(), "filtered-tweets/2020-10-01.jsonl");
    }

    #[test]
    fn trailing_slash_is_ignored() {
        let mut config = oct1();
        config.input_folder = "raw/tweets/".into();
        config.output_folder = "out/".into();
        assert_eq!(config.prefix(), "raw/tweets/dt=2020-10-01/");
        assert_eq!(config.output_key(), "out/2020-10-01.jsonl");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = oct1();
        config.input_folder = "/".into();
        assert!(config.validate().is_err());

        let mut config = oct1();
        config.output_folder.clear();
        assert!(config.validate().is_err());

        let mut config = oct1();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = oct1();
        config.read_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
