//! Landing sink: one object per incoming message
//!
//! Reads newline-delimited JSON messages and stores each one under the
//! current day's partition. Tweets land in `folder`, every other message kind
//! (deletion notices, limit notices, ...) in `messages_folder`. Object names
//! are the BLAKE3 digest of the message bytes, so landing the same message
//! twice writes the same object.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::NaiveDate;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tweetline_core::{ObjectStore, ObjectWriter, ProgressContext, ProgressReporter, StoreError};

use crate::tweet::is_tweet_message;

pub const DEFAULT_MESSAGES_FOLDER: &str = "messages";
pub const DEFAULT_LAND_PROGRESS_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct LandConfig {
    /// Folder receiving tweets
    pub folder: String,
    /// Folder receiving non-tweet messages
    pub messages_folder: String,
    /// Fixed partition date; today (UTC) when unset
    pub date: Option<NaiveDate>,
    pub progress_period: Duration,
}

impl Default for LandConfig {
    fn default() -> Self {
        Self {
            folder: crate::config::DEFAULT_INPUT_FOLDER.to_string(),
            messages_folder: DEFAULT_MESSAGES_FOLDER.to_string(),
            date: None,
            progress_period: DEFAULT_LAND_PROGRESS_PERIOD,
        }
    }
}

impl LandConfig {
    pub fn partition_date(&self) -> NaiveDate {
        self.date
            .unwrap_or_else(|| chrono::Utc::now().date_naive())
    }
}

/// Kind of a decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Tweet,
    Other,
}

/// Decode `line` and tell tweets from other stream messages.
pub fn classify(line: &[u8]) -> Result<MessageKind, sonic_rs::Error> {
    let value: serde_json::Value = sonic_rs::from_slice(line)?;
    Ok(if is_tweet_message(&value) {
        MessageKind::Tweet
    } else {
        MessageKind::Other
    })
}

/// `<folder>/dt=<date>/<blake3 hex>.json`
pub fn object_key(folder: &str, date: NaiveDate, data: &[u8]) -> String {
    format!(
        "{}/dt={}/{}.json",
        folder.trim_end_matches('/'),
        date.format("%Y-%m-%d"),
        blake3::hash(data).to_hex()
    )
}

/// Store `data` as a single object under `key`.
pub async fn land_message<S: ObjectStore>(
    store: &S,
    key: &str,
    data: &[u8],
) -> Result<u64, StoreError> {
    let mut writer = store.create(key).await?;
    if let Err(e) = writer.write_all(data).await {
        writer.abort().await;
        return Err(e.into());
    }
    writer.finish().await
}

/// Counts for a landing session
#[derive(Debug, Default)]
pub struct LandSummary {
    pub lines: u64,
    pub tweets: u64,
    pub messages: u64,
    /// Lines that were not valid JSON
    pub invalid: u64,
    /// Messages whose write failed
    pub failed: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl LandSummary {
    pub fn log(&self) {
        log::info!("=== Landing Summary ===");
        log::info!(
            "Lines: {} ({} tweets, {} other messages, {} invalid)",
            self.lines,
            self.tweets,
            self.messages,
            self.invalid
        );
        if self.failed > 0 {
            log::warn!("Failed writes: {}", self.failed);
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
    }
}

/// Land every line of `input` until end of input or cancellation.
///
/// A failed write is logged and counted; the sink keeps going. Only a read
/// error on `input` ends the session with `Err`.
pub async fn land_lines<S, R>(
    store: Arc<S>,
    mut input: R,
    config: &LandConfig,
    cancel: CancellationToken,
    progress: &ProgressContext,
) -> anyhow::Result<LandSummary>
where
    S: ObjectStore,
    R: AsyncBufRead + Unpin,
{
    anyhow::ensure!(
        !config.progress_period.is_zero(),
        "progress period must be positive"
    );
    let start = Instant::now();
    let reporter = ProgressReporter::spawn(config.progress_period, progress.stage_line("land"));
    let handle = reporter.handle();
    let mut summary = LandSummary::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::info!("Cancellation requested, stopping sink");
                break;
            }
            n = input.read_until(b'\n', &mut buf) => n.context("reading input")?,
        };
        if n == 0 {
            break;
        }
        let line = buf.trim_ascii();
        if line.is_empty() {
            continue;
        }
        summary.lines += 1;

        let folder = match classify(line) {
            Ok(MessageKind::Tweet) => {
                summary.tweets += 1;
                &config.folder
            }
            Ok(MessageKind::Other) => {
                summary.messages += 1;
                &config.messages_folder
            }
            Err(e) => {
                summary.invalid += 1;
                log::warn!("Skipping invalid message on line {}: {e}", summary.lines);
                continue;
            }
        };

        let key = object_key(folder, config.partition_date(), line);
        match land_message(store.as_ref(), &key, line).await {
            Ok(bytes) => {
                summary.bytes += bytes;
                handle.wrote(bytes);
            }
            Err(e) => {
                summary.failed += 1;
                log::warn!("Landing {key} failed: {e}");
            }
        }
    }

    reporter.stop().await;
    summary.elapsed = start.elapsed();
    summary.log();
    Ok(summary)
}
