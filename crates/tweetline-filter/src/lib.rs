//! Tweetline Filter - partition filter pipeline over landed tweets
//!
//! Lists one day's partition, fetches every object with a bounded worker
//! pool, strips denylisted fields and merges the survivors into a single
//! newline-delimited JSON object. Also hosts the landing sink that writes
//! those partitions in the first place.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use tokio_util::sync::CancellationToken;
//! use tweetline_core::{LocalStore, ProgressContext};
//! use tweetline_filter::{FilterConfig, run};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = Arc::new(LocalStore::new("data"));
//! let config = FilterConfig::new(NaiveDate::from_ymd_opt(2020, 10, 1).unwrap());
//! let summary = run(store, &config, CancellationToken::new(), &ProgressContext::hidden()).await?;
//! println!("Wrote {} records", summary.written);
//! # Ok(())
//! # }
//! ```

pub mod clean;
pub mod config;
pub mod error;
pub mod fetch;
pub mod land;
pub mod lister;
pub mod runner;
pub mod tweet;
pub mod writer;

// Re-exports for convenience
pub use clean::{Cleaner, DENYLIST, clean};
pub use config::FilterConfig;
pub use error::{FetchError, FetchPhase, RecordError};
pub use fetch::{FetchResult, fetch_tweet, spawn_pool};
pub use land::{LandConfig, LandSummary, land_lines};
pub use lister::{ListStats, spawn_lister};
pub use runner::{RunOutcome, RunSummary, run};
pub use tweet::Tweet;
pub use writer::{WriterReport, spawn_writer};
