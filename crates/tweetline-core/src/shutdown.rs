//! Two-stage shutdown: the first request cancels gracefully, the second forces exit.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exit status when a second interrupt aborts a graceful shutdown
pub const EXIT_FORCED: u8 = 130;

/// What a shutdown request resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStage {
    /// First request: the cancellation token fired, stages are draining
    Graceful,
    /// Any later request: the caller should terminate immediately
    Forced,
}

/// Shared shutdown state. Clones observe the same token and request count.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    requests: Arc<AtomicUsize>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token handed to the pipeline; cancelled by the first request.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Record a shutdown request.
    pub fn request(&self) -> ShutdownStage {
        if self.requests.fetch_add(1, Ordering::SeqCst) == 0 {
            self.token.cancel();
            ShutdownStage::Graceful
        } else {
            ShutdownStage::Forced
        }
    }
}

/// Route SIGINT/SIGTERM into `shutdown`.
///
/// First signal: graceful cancellation. Second signal: exit with [`EXIT_FORCED`].
pub fn listen_for_signals(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = wait_for_signal().await {
                log::warn!("Signal handler unavailable: {e}");
                return;
            }
            match shutdown.request() {
                ShutdownStage::Graceful => {
                    log::warn!("Interrupt received, draining in-flight writes (interrupt again to abort)");
                }
                ShutdownStage::Forced => {
                    log::error!("Second interrupt, aborting");
                    std::process::exit(i32::from(EXIT_FORCED));
                }
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
