//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: an indicatif spinner line per stage (cleared on completion).
//! Non-TTY mode: log-based output only.
//!
//! [`ProgressReporter`] owns the written file/byte counters. Writers report
//! through a cloned [`ProgressHandle`]; the reporter task is the only place
//! the counters are mutated, and it emits a rate summary on a fixed timer and
//! once more on [`stop`](ProgressReporter::stop).

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        let is_tty = std::io::stderr().is_terminal();
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Context that never draws, for tests and piped output.
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: false,
        }
    }

    /// Create a stage status line managed by MultiProgress.
    ///
    /// Returns a ProgressBar with a spinner for active status display.
    /// Update with `pb.set_message(...)` as the stage progresses.
    /// Call `pb.finish()` to stop the spinner.
    pub fn stage_line(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix:<10.cyan.bold} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_prefix(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    /// Whether running in TTY mode.
    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for `ProgressContext`.
pub type SharedProgress = Arc<ProgressContext>;

/// Monotonic (files, bytes) totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSample {
    pub files: u64,
    pub bytes: u64,
}

impl ProgressSample {
    fn record(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }

    /// One-line rate summary over `elapsed`.
    pub fn rate_line(&self, elapsed: Duration) -> String {
        let secs = elapsed.as_secs_f64();
        let (file_rate, byte_rate) = if secs > 0.0 {
            (self.files as f64 / (secs / 60.0), self.bytes as f64 / secs)
        } else {
            (0.0, 0.0)
        };
        format!(
            "Wrote {:5} files ({file_rate:.2} files/min) with {} ({}/s)",
            self.files,
            byte_unit(self.bytes as f64),
            byte_unit(byte_rate)
        )
    }
}

/// Cheap cloneable intake for the reporter; never blocks the caller.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tx: mpsc::UnboundedSender<u64>,
}

impl ProgressHandle {
    /// Record one written file of `bytes` bytes.
    pub fn wrote(&self, bytes: u64) {
        // Reporter already stopped: nothing left to count into
        let _ = self.tx.send(bytes);
    }
}

/// Background task accumulating writes and logging throughput.
pub struct ProgressReporter {
    handle: ProgressHandle,
    stop: oneshot::Sender<()>,
    task: JoinHandle<ProgressSample>,
}

impl ProgressReporter {
    /// Spawn the reporter on the current tokio runtime.
    ///
    /// Every `period` the current rate line is logged and shown on `bar`.
    pub fn spawn(period: Duration, bar: ProgressBar) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let (stop, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let start = Instant::now();
            let mut sample = ProgressSample::default();
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let tick = |sample: &ProgressSample| {
                let line = sample.rate_line(start.elapsed());
                bar.set_message(line.clone());
                log::info!("{line}");
            };

            loop {
                tokio::select! {
                    Some(n) = rx.recv() => sample.record(n),
                    _ = ticker.tick() => tick(&sample),
                    _ = &mut stop_rx => break,
                }
            }

            // Final write
            while let Ok(n) = rx.try_recv() {
                sample.record(n);
            }
            tick(&sample);
            bar.finish_and_clear();
            sample
        });

        Self {
            handle: ProgressHandle { tx },
            stop,
            task,
        }
    }

    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    /// Stop the timer, emit the final summary and return the totals.
    pub async fn stop(self) -> ProgressSample {
        let _ = self.stop.send(());
        self.task.await.unwrap_or_else(|e| {
            log::error!("Progress reporter failed: {e}");
            ProgressSample::default()
        })
    }
}

/// Format a byte count with binary units.
pub fn byte_unit(x: f64) -> String {
    let power_of_2 = x.log2();
    if power_of_2 < 9.5 {
        format!("{x:.2} B")
    } else if power_of_2 < 19.5 {
        format!("{:.2} KiB", x / (1u64 << 10) as f64)
    } else if power_of_2 < 29.5 {
        format!("{:.2} MiB", x / (1u64 << 20) as f64)
    } else if power_of_2 < 39.5 {
        format!("{:.2} GiB", x / (1u64 << 30) as f64)
    } else {
        format!("{:.2} TiB", x / (1u64 << 40) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_unit_thresholds() {
        assert_eq!(byte_unit(0.0), "0.00 B");
        assert_eq!(byte_unit(512.0), "512.00 B");
        assert_eq!(byte_unit(1024.0), "1.00 KiB");
        assert_eq!(byte_unit(3.0 * 1024.0 * 1024.0), "3.00 MiB");
        assert_eq!(byte_unit(2.0 * (1u64 << 30) as f64), "2.00 GiB");
        assert_eq!(byte_unit(5.0 * (1u64 << 40) as f64), "5.00 TiB");
    }

    #[test]
    fn rate_line_zero_elapsed() {
        let sample = ProgressSample {
            files: 3,
            bytes: 2048,
        };
        let line = sample.rate_line(Duration::ZERO);
        assert!(line.contains("3 files"));
        assert!(line.contains("0.00 files/min"));
        assert!(line.contains("2.00 KiB"));
    }

    #[test]
    fn rate_line_rates() {
        let sample = ProgressSample {
            files: 60,
            bytes: 600,
        };
        let line = sample.rate_line(Duration::from_secs(60));
        assert!(line.contains("60.00 files/min"), "{line}");
        assert!(line.contains("10.00 B/s"), "{line}");
    }

    #[tokio::test]
    async fn reporter_counts_every_write() {
        let reporter = ProgressReporter::spawn(Duration::from_secs(3600), ProgressBar::hidden());
        let handle = reporter.handle();
        for n in [10, 20, 30] {
            handle.wrote(n);
        }
        let sample = reporter.stop().await;
        assert_eq!(
            sample,
            ProgressSample {
                files: 3,
                bytes: 60
            }
        );
    }

    #[tokio::test]
    async fn wrote_after_stop_is_ignored() {
        let reporter = ProgressReporter::spawn(Duration::from_secs(3600), ProgressBar::hidden());
        let handle = reporter.handle();
        reporter.stop().await;
        handle.wrote(1);
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_ticks_on_timer() {
        let reporter = ProgressReporter::spawn(Duration::from_secs(5), ProgressBar::hidden());
        reporter.handle().wrote(100);
        tokio::time::sleep(Duration::from_secs(11)).await;
        let sample = reporter.stop().await;
        assert_eq!(sample.files, 1);
    }
}
