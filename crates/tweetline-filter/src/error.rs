//! Per-record error types.
//!
//! None of these abort a run: each one drops exactly one record.

use std::fmt;
use std::time::Duration;

use tweetline_core::StoreError;

/// Stage of a single object fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    /// Opening the object (request sent, headers pending)
    Connect,
    /// Streaming the object body
    Read,
    /// Decoding the bytes as a tweet
    Decode,
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Read => "read",
            Self::Decode => "decode",
        })
    }
}

#[derive(Debug)]
pub enum FetchErrorKind {
    Store(StoreError),
    Io(std::io::Error),
    Timeout(Duration),
    Decode(String),
}

/// Failure to fetch or decode one object.
#[derive(Debug)]
pub struct FetchError {
    pub key: String,
    pub phase: FetchPhase,
    pub kind: FetchErrorKind,
}

impl FetchError {
    pub fn store(key: &str, phase: FetchPhase, e: StoreError) -> Self {
        Self::new(key, phase, FetchErrorKind::Store(e))
    }

    pub fn io(key: &str, phase: FetchPhase, e: std::io::Error) -> Self {
        Self::new(key, phase, FetchErrorKind::Io(e))
    }

    pub fn timeout(key: &str, phase: FetchPhase, after: Duration) -> Self {
        Self::new(key, phase, FetchErrorKind::Timeout(after))
    }

    pub fn decode(key: &str, message: impl Into<String>) -> Self {
        Self::new(key, FetchPhase::Decode, FetchErrorKind::Decode(message.into()))
    }

    fn new(key: &str, phase: FetchPhase, kind: FetchErrorKind) -> Self {
        Self {
            key: key.to_string(),
            phase,
            kind,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, FetchErrorKind::Timeout(_))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}: ", self.phase, self.key)?;
        match &self.kind {
            FetchErrorKind::Store(e) => write!(f, "{e}"),
            FetchErrorKind::Io(e) => write!(f, "{e}"),
            FetchErrorKind::Timeout(after) => {
                write!(f, "timed out after {:.1}s", after.as_secs_f64())
            }
            FetchErrorKind::Decode(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Why one record did not make it into the output.
#[derive(Debug)]
pub enum RecordError {
    Fetch(FetchError),
    /// Cleaned tweet could not be serialized
    Encode { key: String, message: String },
    /// Output stream rejected the line
    Write { key: String, source: std::io::Error },
}

impl RecordError {
    pub fn key(&self) -> &str {
        match self {
            Self::Fetch(e) => &e.key,
            Self::Encode { key, .. } | Self::Write { key, .. } => key,
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "tweet {e}"),
            Self::Encode { key, message } => write!(f, "marshaling {key:?}: {message}"),
            Self::Write { key, source } => write!(f, "writing {key:?}: {source}"),
        }
    }
}

impl std::error::Error for RecordError {}

impl From<FetchError> for RecordError {
    fn from(e: FetchError) -> Self {
        Self::Fetch(e)
    }
}
