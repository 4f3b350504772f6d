pub mod filter;
pub mod land;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tweetline_core::{HttpStore, LocalStore};

use crate::config::{Backend, StoreConfig};

/// Pipeline or output failure
pub const EXIT_FAILURE: u8 = 1;
/// Invalid arguments or configuration; nothing was started
pub const EXIT_CONFIG: u8 = 2;

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date format: {e}"))
}

/// The configured backend, resolved.
pub enum Store {
    Local(LocalStore),
    Http(HttpStore),
}

impl Store {
    /// Build the backend from config; `bucket` overrides the configured bucket.
    pub fn open(config: &StoreConfig, bucket: Option<&str>) -> Result<Self> {
        match config.backend {
            Backend::Local => {
                let root = match bucket {
                    Some(b) => config.root.join(b),
                    None => config.root.clone(),
                };
                Ok(Self::Local(
                    LocalStore::new(root).with_page_size(config.page_size),
                ))
            }
            Backend::Http => {
                let bucket = bucket.unwrap_or(&config.bucket);
                if bucket.is_empty() {
                    anyhow::bail!("bucket must not be empty");
                }
                let store = HttpStore::new(&config.endpoint, bucket)
                    .with_context(|| format!("invalid store endpoint {:?}", config.endpoint))?
                    .with_token(config.token.clone())
                    .with_page_size(config.page_size);
                Ok(Self::Http(store))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Local(s) => format!("local:{}", s.root().display()),
            Self::Http(_) => "http".to_string(),
        }
    }
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")
}
