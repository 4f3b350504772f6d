//! In-memory backend with fault injection, used by tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::{BoxReader, DEFAULT_PAGE_SIZE, ListPage, ObjectEntry, ObjectStore, ObjectWriter};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Vec<u8>>,
    stalled: HashSet<String>,
    broken: HashSet<String>,
    delays: HashMap<String, Duration>,
    fail_listing_after: Option<usize>,
    pages_served: usize,
    opens: usize,
    write_fault: Option<Vec<u8>>,
}

/// Shared in-memory object map. Clones share the same contents, so a test can
/// keep a handle while the pipeline owns another.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.lock().objects.insert(key.into(), data.into());
    }

    /// Insert a zero-length directory marker.
    pub fn insert_placeholder(&self, key: impl Into<String>) {
        self.insert(key, Vec::new());
    }

    /// Reads of `key` deliver the first half of its bytes, then never make progress.
    pub fn stall(&self, key: impl Into<String>) {
        self.lock().stalled.insert(key.into());
    }

    /// Opening `key` fails with a connection error.
    pub fn break_open(&self, key: impl Into<String>) {
        self.lock().broken.insert(key.into());
    }

    /// Opening `key` waits `delay` before returning.
    pub fn delay_open(&self, key: impl Into<String>, delay: Duration) {
        self.lock().delays.insert(key.into(), delay);
    }

    /// Serve `pages` listing pages, then fail every listing call.
    pub fn fail_listing_after(&self, pages: usize) {
        self.lock().fail_listing_after = Some(pages);
    }

    /// The first write whose buffer contains `needle` stores half of it and
    /// then fails.
    pub fn fail_write_containing(&self, needle: impl Into<Vec<u8>>) {
        self.lock().write_fault = Some(needle.into());
    }

    /// Number of `open` calls made so far.
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    /// Committed contents of `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }
}

impl ObjectStore for MemoryStore {
    type Writer = MemoryWriter;

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let sorted = {
            let mut state = self.lock();
            if state
                .fail_listing_after
                .is_some_and(|n| state.pages_served >= n)
            {
                return Err(StoreError::Http {
                    status: Some(503),
                    message: format!("listing {prefix:?} unavailable"),
                });
            }
            state.pages_served += 1;
            state
                .objects
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| ObjectEntry::new(k.clone(), v.len() as u64))
                .collect::<Vec<_>>()
        };
        Ok(super::page_after(&sorted, continuation, self.page_size))
    }

    async fn open(&self, key: &str) -> Result<BoxReader, StoreError> {
        let delay = {
            let mut state = self.lock();
            state.opens += 1;
            state.delays.get(key).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        if state.broken.contains(key) {
            return Err(StoreError::Http {
                status: None,
                message: format!("connection reset opening {key}"),
            });
        }
        let data = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if state.stalled.contains(key) {
            let head = data[..data.len() / 2].to_vec();
            return Ok(Box::pin(StallingReader { head, pos: 0 }));
        }
        Ok(Box::pin(io::Cursor::new(data)))
    }

    async fn create(&self, key: &str) -> Result<MemoryWriter, StoreError> {
        Ok(MemoryWriter {
            key: key.to_string(),
            buf: Vec::new(),
            failing: false,
            state: self.state.clone(),
        })
    }
}

/// Yields `head`, then stays pending forever.
struct StallingReader {
    head: Vec<u8>,
    pos: usize,
}

impl AsyncRead for StallingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let rest = &self.head[self.pos..];
        if rest.is_empty() {
            return Poll::Pending;
        }
        let n = rest.len().min(buf.remaining());
        buf.put_slice(&rest[..n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// Buffers writes; the object appears in the store on `finish`.
#[derive(Debug)]
pub struct MemoryWriter {
    key: String,
    buf: Vec<u8>,
    /// Part of a faulted write went through; the next call fails
    failing: bool,
    state: Arc<Mutex<State>>,
}

impl MemoryWriter {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the write fault if `data` triggers it.
    fn trips(&self, data: &[u8]) -> bool {
        let mut state = self.lock();
        let hit = state
            .write_fault
            .as_deref()
            .is_some_and(|n| !n.is_empty() && data.windows(n.len()).any(|w| w == n));
        if hit {
            state.write_fault = None;
        }
        hit
    }
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.failing {
            self.failing = false;
            return Poll::Ready(Err(io::Error::other("injected write failure")));
        }
        if self.trips(data) {
            let half = data.len() / 2;
            self.buf.extend_from_slice(&data[..half]);
            self.failing = true;
            return Poll::Ready(Ok(half));
        }
        self.buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl ObjectWriter for MemoryWriter {
    async fn finish(self) -> Result<u64, StoreError> {
        let len = self.buf.len() as u64;
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .objects
            .insert(self.key, self.buf);
        Ok(len)
    }

    async fn truncate(&mut self, len: u64) -> Result<(), StoreError> {
        self.buf.truncate(len as usize);
        self.failing = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn list_reports_placeholders_with_zero_size() {
        let store = MemoryStore::new();
        store.insert("tweets/dt=2020-10-01/a.json", b"{\"id\":1}".to_vec());
        store.insert_placeholder("tweets/dt=2020-10-01/");
        store.insert("other/x.json", b"{}".to_vec());

        let page = store.list_page("tweets/", None).await.unwrap();
        assert_eq!(page.entries.len(), 2);
        assert!(page.entries.iter().any(|e| e.is_placeholder()));
    }

    #[tokio::test]
    async fn listing_fails_after_configured_pages() {
        let store = MemoryStore::new().with_page_size(1);
        store.insert("p/a", b"1".to_vec());
        store.insert("p/b", b"1".to_vec());
        store.fail_listing_after(1);

        let first = store.list_page("p/", None).await.unwrap();
        assert!(first.next.is_some());
        assert!(store.list_page("p/", first.next.as_deref()).await.is_err());
    }

    #[tokio::test]
    async fn open_counts_and_reads() {
        let store = MemoryStore::new();
        store.insert("a", b"hello".to_vec());
        let mut s = String::new();
        store
            .open("a")
            .await
            .unwrap()
            .read_to_string(&mut s)
            .await
            .unwrap();
        assert_eq!(s, "hello");
        assert!(store.open("missing").await.err().unwrap().is_not_found());
        assert_eq!(store.opens(), 2);
    }

    #[tokio::test]
    async fn stalled_read_never_completes() {
        let store = MemoryStore::new();
        store.insert("slow", b"0123456789".to_vec());
        store.stall("slow");
        let mut reader = store.open("slow").await.unwrap();
        let mut buf = Vec::new();
        let res = tokio::time::timeout(
            Duration::from_millis(50),
            reader.read_to_end(&mut buf),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(buf, b"01234");
    }

    #[tokio::test]
    async fn writer_invisible_until_finish() {
        let store = MemoryStore::new();
        let mut w = store.create("out.jsonl").await.unwrap();
        w.write_all(b"line\n").await.unwrap();
        assert!(store.get("out.jsonl").is_none());
        assert_eq!(w.finish().await.unwrap(), 5);
        assert_eq!(store.get("out.jsonl").unwrap(), b"line\n");
    }

    #[tokio::test]
    async fn write_fault_fails_once_after_a_partial_write() {
        let store = MemoryStore::new();
        store.fail_write_containing("bad");
        let mut w = store.create("out.jsonl").await.unwrap();
        w.write_all(b"ok\n").await.unwrap();
        assert!(w.write_all(b"a bad line\n").await.is_err());
        w.truncate(3).await.unwrap();
        w.write_all(b"bad again\n").await.unwrap();
        w.finish().await.unwrap();
        assert_eq!(store.get("out.jsonl").unwrap(), b"ok\nbad again\n");
    }
}
