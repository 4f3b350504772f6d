//! Tweetline Core - Common infrastructure for the tweet landing/filter pipelines
//!
//! This crate provides the object store abstraction and its backends,
//! progress reporting, logging setup and two-stage shutdown.

pub mod error;
pub mod logging;
pub mod progress;
pub mod shutdown;
pub mod store;

// Re-exports for convenience
pub use error::StoreError;
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{
    ProgressContext, ProgressHandle, ProgressReporter, ProgressSample, SharedProgress, byte_unit,
};
pub use shutdown::{EXIT_FORCED, Shutdown, ShutdownStage, listen_for_signals};
pub use store::{
    BoxReader, HttpStore, ListPage, LocalStore, MemoryStore, ObjectEntry, ObjectStore,
    ObjectWriter,
};
