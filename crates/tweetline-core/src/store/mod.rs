//! Object store abstraction: paginated listing, streamed reads, committed writes.
//!
//! The pipeline only depends on the [`ObjectStore`] trait. Backends:
//! - [`LocalStore`]: directory tree on the local filesystem
//! - [`HttpStore`]: S3/GCS-compatible XML API over HTTP
//! - [`MemoryStore`]: in-process map with fault injection, for tests

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::StoreError;

pub mod http;
pub mod local;
pub mod memory;

pub use http::HttpStore;
pub use local::LocalStore;
pub use memory::MemoryStore;

/// Default number of entries requested per listing page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Byte stream returned by [`ObjectStore::open`]
pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;

/// Identifier and size of a stored object, as reported by a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

impl ObjectEntry {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }

    /// Zero-length entries are directory markers, not data.
    pub fn is_placeholder(&self) -> bool {
        self.size == 0
    }
}

/// One page of a prefix listing.
#[derive(Debug, Default)]
pub struct ListPage {
    pub entries: Vec<ObjectEntry>,
    /// Continuation token for the next page; `None` on the last page
    pub next: Option<String>,
}

/// Writer for a single object. Nothing is visible under the key until
/// [`finish`](ObjectWriter::finish) succeeds.
pub trait ObjectWriter: AsyncWrite + Unpin + Send {
    /// Flush and commit the object. Returns the number of bytes stored.
    fn finish(self) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Cut the object back to its first `len` bytes; later writes continue there.
    fn truncate(&mut self, len: u64) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Drop everything written so far; nothing is stored under the key.
    fn abort(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized,
    {
        async {}
    }
}

/// The three operations the pipeline needs from an object store.
pub trait ObjectStore: Send + Sync + 'static {
    type Writer: ObjectWriter + 'static;

    /// List one page of objects whose key starts with `prefix`.
    fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> impl Future<Output = Result<ListPage, StoreError>> + Send;

    /// Open an object for reading.
    fn open(&self, key: &str) -> impl Future<Output = Result<BoxReader, StoreError>> + Send;

    /// Start writing an object.
    fn create(&self, key: &str) -> impl Future<Output = Result<Self::Writer, StoreError>> + Send;
}

/// Page `sorted` entries by start-after token. Shared by the local and memory backends.
fn page_after(sorted: &[ObjectEntry], after: Option<&str>, page_size: usize) -> ListPage {
    let page_size = page_size.max(1);
    let start = after.map_or(0, |a| sorted.partition_point(|e| e.key.as_str() <= a));
    let rest = &sorted[start..];
    let entries = rest[..rest.len().min(page_size)].to_vec();
    let next = if rest.len() > page_size {
        entries.last().map(|e| e.key.clone())
    } else {
        None
    };
    ListPage { entries, next }
}
