//! Single Writer: the only task that touches the output object

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tweetline_core::{ObjectWriter, ProgressHandle, StoreError};

use crate::clean::Cleaner;
use crate::error::RecordError;
use crate::fetch::FetchResult;
use crate::tweet::Tweet;

/// What the writer did before closing the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    /// Lines written
    pub written: u64,
    /// Bytes written, newlines included
    pub bytes: u64,
    /// Stopped by cancellation before the input was exhausted
    pub cancelled: bool,
    /// Output was committed (false when discarded after a fatal error)
    pub committed: bool,
}

/// Spawn the writer task.
///
/// Runs until `results` closes or `stop` fires, whichever comes first, then
/// closes `output` exactly once: aborted if `discard` has fired, committed
/// otherwise. Per-record failures go to `errors`; the task ends early if
/// `stop` fires while it waits on that channel. A failed write is cut back
/// to the last whole line; if that fails too the output is aborted and the
/// task returns the error.
pub fn spawn_writer<W: ObjectWriter + 'static>(
    output: W,
    results: mpsc::Receiver<FetchResult>,
    errors: mpsc::Sender<RecordError>,
    progress: ProgressHandle,
    cleaner: Cleaner,
    stop: CancellationToken,
    discard: CancellationToken,
) -> JoinHandle<Result<WriterReport, StoreError>> {
    tokio::spawn(write_all_results(
        output, results, errors, progress, cleaner, stop, discard,
    ))
}

async fn write_all_results<W: ObjectWriter>(
    mut output: W,
    mut results: mpsc::Receiver<FetchResult>,
    errors: mpsc::Sender<RecordError>,
    progress: ProgressHandle,
    cleaner: Cleaner,
    stop: CancellationToken,
    discard: CancellationToken,
) -> Result<WriterReport, StoreError> {
    let mut report = WriterReport::default();
    let mut line = Vec::with_capacity(4096);

    loop {
        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                report.cancelled = true;
                break;
            }
            r = results.recv() => match r {
                Some(r) => r,
                None => break,
            },
        };

        let failure = match result {
            FetchResult::Failed(e) => RecordError::Fetch(e),
            FetchResult::Fetched { key, mut tweet } => {
                match write_line(&mut output, &mut line, &key, &mut tweet, &cleaner).await {
                    Ok(n) => {
                        report.written += 1;
                        report.bytes += n;
                        progress.wrote(n);
                        continue;
                    }
                    Err(e) => {
                        if matches!(e, RecordError::Write { .. }) {
                            // Cut any partial line so the next one starts on a boundary
                            if let Err(cut) = output.truncate(report.bytes).await {
                                log::error!("Output unusable after failed write: {cut}");
                                output.abort().await;
                                return Err(cut);
                            }
                        }
                        e
                    }
                }
            }
        };

        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                report.cancelled = true;
                break;
            }
            _ = errors.send(failure) => {}
        }
    }

    if discard.is_cancelled() {
        log::debug!("Discarding output after {} lines", report.written);
        output.abort().await;
        return Ok(report);
    }

    output.finish().await?;
    report.committed = true;
    Ok(report)
}

/// Clean, encode and append one tweet. The whole line is buffered before the
/// single write so a line is never split across writes.
async fn write_line<W: ObjectWriter>(
    output: &mut W,
    line: &mut Vec<u8>,
    key: &str,
    tweet: &mut Tweet,
    cleaner: &Cleaner,
) -> Result<u64, RecordError> {
    cleaner.clean(tweet);

    line.clear();
    serde_json::to_writer(&mut *line, &*tweet).map_err(|e| RecordError::Encode {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    line.push(b'\n');

    output
        .write_all(&line[..])
        .await
        .map_err(|source| RecordError::Write {
            key: key.to_string(),
            source,
        })?;
    Ok(line.len() as u64)
}
