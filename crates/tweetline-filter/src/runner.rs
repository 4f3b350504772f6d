//! Pipeline orchestration: Lister → Fetch Worker Pool → Single Writer
//!
//! All three stages start at once. The orchestrator waits on three signals
//! (per-record errors from the writer, the lister's terminal result, and
//! external cancellation) and decides the [`RunOutcome`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tweetline_core::{ObjectStore, ProgressContext, ProgressReporter, StoreError, byte_unit};

use crate::clean::Cleaner;
use crate::config::FilterConfig;
use crate::fetch::spawn_pool;
use crate::lister::{ListStats, Listing, spawn_lister};
use crate::writer::spawn_writer;

/// Per-record errors buffered between writer and orchestrator
const ERROR_QUEUE: usize = 64;

/// Terminal state of a run.
#[derive(Debug)]
pub enum RunOutcome {
    Success,
    /// Completed, but some records were dropped
    PartialFailure { failures: u64 },
    /// Listing failed; the output was discarded
    Fatal(StoreError),
    /// Stopped by cancellation; lines written so far were committed
    Cancelled,
}

impl RunOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Summary of a filter run
#[derive(Debug)]
pub struct RunSummary {
    pub prefix: String,
    pub output_key: String,
    /// Entries listed, placeholders included
    pub listed: u64,
    pub placeholders: u64,
    pub written: u64,
    pub bytes: u64,
    pub failures: u64,
    pub elapsed: Duration,
    pub outcome: RunOutcome,
}

impl RunSummary {
    pub fn log(&self) {
        log::info!("=== Filter Summary ===");
        log::info!("Input: {} -> {}", self.prefix, self.output_key);
        log::info!(
            "Objects: {} listed ({} placeholders skipped)",
            self.listed,
            self.placeholders
        );
        log::info!(
            "Records: {} written, {} failed ({})",
            self.written,
            self.failures,
            byte_unit(self.bytes as f64)
        );
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
        let secs = self.elapsed.as_secs_f64();
        if self.written > 0 && secs > 0.0 {
            log::info!(
                "Throughput: {:.0} records/sec, {}/s",
                self.written as f64 / secs,
                byte_unit(self.bytes as f64 / secs)
            );
        }
        match &self.outcome {
            RunOutcome::Success => log::info!("Outcome: success"),
            RunOutcome::PartialFailure { failures } => {
                log::warn!("Outcome: completed with {failures} dropped records")
            }
            RunOutcome::Fatal(e) => log::error!("Outcome: listing failed: {e}"),
            RunOutcome::Cancelled => log::warn!("Outcome: cancelled"),
        }
    }
}

/// Run one filter pass over `config.prefix()` into `config.output_key()`.
///
/// `shutdown` is the external cancellation signal. Returns `Err` only when
/// the output object cannot be created or committed; everything else,
/// including a failed listing, is reported through [`RunSummary::outcome`].
pub async fn run<S: ObjectStore>(
    store: Arc<S>,
    config: &FilterConfig,
    shutdown: CancellationToken,
    progress: &ProgressContext,
) -> anyhow::Result<RunSummary> {
    config.validate().context("invalid filter config")?;
    let start = Instant::now();
    let prefix = config.prefix();
    let output_key = config.output_key();

    log::info!(
        "Filtering {prefix} into {output_key} with {} workers",
        config.workers
    );

    let output = store
        .create(&output_key)
        .await
        .with_context(|| format!("creating output {output_key}"))?;

    // stop: every stage unwinds; discard: the writer aborts instead of committing
    let stop = shutdown.child_token();
    let discard = CancellationToken::new();

    let reporter = ProgressReporter::spawn(config.progress_period, progress.stage_line("filter"));

    let Listing {
        keys,
        mut done,
        task: lister_task,
    } = spawn_lister(store.clone(), prefix.clone(), stop.clone(), discard.clone());
    let (results, pool) = spawn_pool(
        store.clone(),
        keys,
        config.workers,
        config.read_timeout,
        stop.clone(),
    );
    let (errors_tx, mut errors) = mpsc::channel(ERROR_QUEUE);
    let writer = spawn_writer(
        output,
        results,
        errors_tx,
        reporter.handle(),
        Cleaner::default(),
        stop.clone(),
        discard.clone(),
    );

    let mut failures = 0u64;
    let mut list_stats = ListStats::default();
    let mut listing_done = false;
    let mut fatal: Option<StoreError> = None;
    let mut cancel_seen = false;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled(), if !cancel_seen => {
                cancel_seen = true;
                log::warn!("Cancellation requested, draining in-flight writes");
            }
            listed = &mut done, if !listing_done => {
                listing_done = true;
                match listed {
                    Ok(Ok(stats)) => list_stats = stats,
                    Ok(Err(e)) => {
                        log::error!("Listing {prefix} failed: {e}");
                        fatal = Some(e);
                        break;
                    }
                    Err(_) => {
                        fatal = Some(StoreError::Io(std::io::Error::other(
                            "lister exited without a result",
                        )));
                        break;
                    }
                }
            }
            err = errors.recv() => match err {
                Some(e) => {
                    failures += 1;
                    log::warn!("{e}");
                }
                // Writer finished and dropped its sender
                None => break,
            },
        }
    }

    if fatal.is_some() {
        // Abandon buffered work
        discard.cancel();
        stop.cancel();
    }

    let report = writer
        .await
        .context("writer task failed")?
        .with_context(|| format!("committing output {output_key}"))?;

    if !listing_done {
        match done.await {
            Ok(Ok(stats)) => list_stats = stats,
            Ok(Err(e)) => fatal = Some(e),
            Err(_) => log::warn!("Lister exited without a result"),
        }
    }
    let taken = pool.join().await;
    if let Err(e) = lister_task.await {
        log::error!("Lister task failed: {e}");
    }
    let sample = reporter.stop().await;
    log::debug!(
        "Fetch workers took {taken} keys, reporter counted {} lines",
        sample.files
    );

    let outcome = match fatal {
        Some(e) => RunOutcome::Fatal(e),
        None if report.cancelled => RunOutcome::Cancelled,
        None if failures > 0 => RunOutcome::PartialFailure { failures },
        None => RunOutcome::Success,
    };

    let summary = RunSummary {
        prefix,
        output_key,
        listed: list_stats.listed,
        placeholders: list_stats.placeholders,
        written: report.written,
        bytes: report.bytes,
        failures,
        elapsed: start.elapsed(),
        outcome,
    };
    summary.log();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(outcome: RunOutcome) -> RunSummary {
        RunSummary {
            prefix: "tweets/dt=2020-10-01/".into(),
            output_key: "filtered-tweets/2020-10-01.jsonl".into(),
            listed: 10,
            placeholders: 1,
            written: 8,
            bytes: 4096,
            failures: 1,
            elapsed: Duration::from_secs(2),
            outcome,
        }
    }

    #[test]
    fn fatal_is_only_listing_failure() {
        assert!(RunOutcome::Fatal(StoreError::NotFound("x".into())).is_fatal());
        assert!(!RunOutcome::Cancelled.is_fatal());
        assert!(!RunOutcome::PartialFailure { failures: 3 }.is_fatal());
        assert!(!RunOutcome::Success.is_fatal());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_io() {
        let store = tweetline_core::MemoryStore::new();
        let config = FilterConfig {
            progress_period: Duration::ZERO,
            ..FilterConfig::new(chrono::NaiveDate::from_ymd_opt(2020, 10, 1).unwrap())
        };
        let err = run(
            Arc::new(store.clone()),
            &config,
            CancellationToken::new(),
            &ProgressContext::hidden(),
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("progress period"));
        assert!(store.keys().is_empty());
    }

    #[test]
    fn summary_log_does_not_panic() {
        summary(RunOutcome::Success).log();
        summary(RunOutcome::PartialFailure { failures: 1 }).log();
        summary(RunOutcome::Cancelled).log();
        let mut s = summary(RunOutcome::Fatal(StoreError::Xml("bad".into())));
        s.elapsed = Duration::ZERO;
        s.log();
    }
}
