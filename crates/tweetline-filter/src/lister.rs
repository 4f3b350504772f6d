//! Object Lister: pages through a prefix and hands keys to the fetch pool

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tweetline_core::{ObjectStore, StoreError};

/// Counts gathered while listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListStats {
    /// Entries returned by the store, placeholders included
    pub listed: u64,
    /// Zero-size directory markers that were skipped
    pub placeholders: u64,
}

impl ListStats {
    /// Keys actually handed downstream.
    pub fn keys(&self) -> u64 {
        self.listed - self.placeholders
    }
}

/// Handles to a running lister.
pub struct Listing {
    /// Keys of non-empty objects; closed when listing ends
    pub keys: mpsc::Receiver<String>,
    /// Resolves once: stats on completion or cancellation, the error if a page failed
    pub done: oneshot::Receiver<Result<ListStats, StoreError>>,
    pub task: JoinHandle<()>,
}

/// Spawn a lister over `prefix`.
///
/// The key channel holds a single entry, so the lister never runs more than
/// one key ahead of the pool. On a listing failure `fatal` is cancelled
/// before the key channel closes.
pub fn spawn_lister<S: ObjectStore>(
    store: Arc<S>,
    prefix: String,
    cancel: CancellationToken,
    fatal: CancellationToken,
) -> Listing {
    let (tx, keys) = mpsc::channel(1);
    let (done_tx, done) = oneshot::channel();

    let task = tokio::spawn(async move {
        let result = list_into(store.as_ref(), &prefix, &tx, &cancel).await;
        match &result {
            Ok(stats) => log::debug!(
                "Listed {} entries under {prefix} ({} placeholders)",
                stats.listed,
                stats.placeholders
            ),
            Err(_) => fatal.cancel(),
        }
        let _ = done_tx.send(result);
        // tx dropped here, closing the key channel
    });

    Listing { keys, done, task }
}

/// Send every non-placeholder key under `prefix` to `tx`, page by page.
///
/// Returns on the last page, on cancellation, or when the receiver is gone.
/// A failed page is returned as-is and never retried.
pub async fn list_into<S: ObjectStore>(
    store: &S,
    prefix: &str,
    tx: &mpsc::Sender<String>,
    cancel: &CancellationToken,
) -> Result<ListStats, StoreError> {
    let mut stats = ListStats::default();
    let mut continuation: Option<String> = None;

    loop {
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(stats),
            page = store.list_page(prefix, continuation.as_deref()) => page?,
        };

        for entry in page.entries {
            stats.listed += 1;
            if entry.is_placeholder() {
                stats.placeholders += 1;
                log::debug!("Skipping placeholder {}", entry.key);
                continue;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(stats),
                sent = tx.send(entry.key) => {
                    if sent.is_err() {
                        return Ok(stats);
                    }
                }
            }
        }

        match page.next {
            Some(next) => continuation = Some(next),
            None => return Ok(stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tweetline_core::MemoryStore;

    fn store_with(n: usize) -> MemoryStore {
        let store = MemoryStore::new().with_page_size(3);
        for i in 0..n {
            store.insert(format!("tweets/dt=2020-10-01/{i:03}.json"), b"{\"id\":1}".to_vec());
        }
        store
    }

    async fn collect(mut listing: Listing) -> (Vec<String>, Result<ListStats, StoreError>) {
        let mut keys = Vec::new();
        while let Some(k) = listing.keys.recv().await {
            keys.push(k);
        }
        let done = listing.done.await.unwrap();
        (keys, done)
    }

    #[tokio::test]
    async fn lists_all_pages_and_skips_placeholders() {
        let store = store_with(7);
        store.insert_placeholder("tweets/dt=2020-10-01/");
        store.insert("tweets/dt=2020-10-02/other.json", b"{}".to_vec());

        let listing = spawn_lister(
            Arc::new(store),
            "tweets/dt=2020-10-01/".into(),
            CancellationToken::new(),
            CancellationToken::new(),
        );
        let (keys, done) = collect(listing).await;
        let stats = done.unwrap();

        assert_eq!(keys.len(), 7);
        assert!(keys.iter().all(|k| k.starts_with("tweets/dt=2020-10-01/")));
        assert!(!keys.contains(&"tweets/dt=2020-10-01/".to_string()));
        assert_eq!(stats.listed, 8);
        assert_eq!(stats.placeholders, 1);
        assert_eq!(stats.keys(), 7);
    }

    #[tokio::test]
    async fn page_failure_is_reported_once() {
        let store = store_with(7);
        store.fail_listing_after(1);
        let fatal = CancellationToken::new();

        let listing = spawn_lister(
            Arc::new(store),
            "tweets/".into(),
            CancellationToken::new(),
            fatal.clone(),
        );
        let (keys, done) = collect(listing).await;

        // First page made it through before the failure
        assert_eq!(keys.len(), 3);
        let err = done.unwrap_err();
        assert!(matches!(err, StoreError::Http { status: Some(503), .. }));
        assert!(fatal.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_while_blocked_on_send() {
        let store = store_with(5);
        let cancel = CancellationToken::new();
        let fatal = CancellationToken::new();
        let mut listing = spawn_lister(
            Arc::new(store),
            "tweets/".into(),
            cancel.clone(),
            fatal.clone(),
        );

        // Take one key; the lister then blocks on a full channel
        assert!(listing.keys.recv().await.is_some());
        cancel.cancel();
        let stats = (&mut listing.done).await.unwrap().unwrap();
        assert!(stats.listed < 5);
        assert!(!fatal.is_cancelled());
        listing.task.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_receiver_dropped() {
        let store = store_with(5);
        let listing = spawn_lister(
            Arc::new(store),
            "tweets/".into(),
            CancellationToken::new(),
            CancellationToken::new(),
        );
        drop(listing.keys);
        assert!(listing.done.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn empty_prefix_completes() {
        let (keys, done) = collect(spawn_lister(
            Arc::new(MemoryStore::new()),
            "nothing/".into(),
            CancellationToken::new(),
            CancellationToken::new(),
        ))
        .await;
        assert!(keys.is_empty());
        assert_eq!(done.unwrap(), ListStats::default());
    }
}
