//! Fetch Worker Pool
//!
//! A fixed number of workers share one key receiver. Each worker takes a key,
//! reads and decodes the object under a per-object deadline and sends a
//! [`FetchResult`] to the writer. The result channel closes once the last
//! worker has exited, never earlier.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tweetline_core::ObjectStore;

use crate::error::{FetchError, FetchPhase};
use crate::tweet::Tweet;

/// Outcome of fetching one key. Produced once per key a worker takes.
#[derive(Debug)]
pub enum FetchResult {
    Fetched { key: String, tweet: Tweet },
    Failed(FetchError),
}

type SharedKeys = Arc<Mutex<mpsc::Receiver<String>>>;

/// Running pool. Each worker yields the number of keys it took.
pub struct PoolHandle {
    workers: JoinSet<u64>,
}

impl PoolHandle {
    /// Wait for every worker and return the total number of keys taken.
    pub async fn join(mut self) -> u64 {
        let mut taken = 0;
        while let Some(res) = self.workers.join_next().await {
            match res {
                Ok(n) => taken += n,
                Err(e) => log::error!("Fetch worker failed: {e}"),
            }
        }
        taken
    }
}

/// Start `workers` fetch workers reading keys from `keys`.
pub fn spawn_pool<S: ObjectStore>(
    store: Arc<S>,
    keys: mpsc::Receiver<String>,
    workers: usize,
    read_timeout: Duration,
    cancel: CancellationToken,
) -> (mpsc::Receiver<FetchResult>, PoolHandle) {
    let (tx, results) = mpsc::channel(1);
    let keys: SharedKeys = Arc::new(Mutex::new(keys));

    let mut set = JoinSet::new();
    for id in 0..workers.max(1) {
        set.spawn(worker(
            id,
            store.clone(),
            keys.clone(),
            tx.clone(),
            read_timeout,
            cancel.clone(),
        ));
    }

    (results, PoolHandle { workers: set })
}

async fn next_key(keys: &Mutex<mpsc::Receiver<String>>) -> Option<String> {
    keys.lock().await.recv().await
}

async fn worker<S: ObjectStore>(
    id: usize,
    store: Arc<S>,
    keys: SharedKeys,
    tx: mpsc::Sender<FetchResult>,
    read_timeout: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut taken = 0u64;

    loop {
        let key = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            key = next_key(&keys) => match key {
                Some(key) => key,
                None => break,
            },
        };
        taken += 1;

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = fetch_tweet(store.as_ref(), &key, read_timeout) => r,
        };
        let result = match fetched {
            Ok(tweet) => FetchResult::Fetched { key, tweet },
            Err(e) => FetchResult::Failed(e),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(result) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    log::debug!("Fetch worker {id} done after {taken} objects");
    taken
}

/// Read and decode one object.
///
/// Opening and reading share a single deadline `read_timeout` after the
/// call starts, so a read that begins but stalls is still cut off.
pub async fn fetch_tweet<S: ObjectStore>(
    store: &S,
    key: &str,
    read_timeout: Duration,
) -> Result<Tweet, FetchError> {
    let deadline = Instant::now() + read_timeout;

    let mut reader = timeout_at(deadline, store.open(key))
        .await
        .map_err(|_| FetchError::timeout(key, FetchPhase::Connect, read_timeout))?
        .map_err(|e| FetchError::store(key, FetchPhase::Connect, e))?;

    let mut data = Vec::new();
    timeout_at(deadline, reader.read_to_end(&mut data))
        .await
        .map_err(|_| FetchError::timeout(key, FetchPhase::Read, read_timeout))?
        .map_err(|e| FetchError::io(key, FetchPhase::Read, e))?;

    Tweet::from_slice(&data).map_err(|e| FetchError::decode(key, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tweetline_core::store::memory::MemoryWriter;
    use tweetline_core::{BoxReader, ListPage, MemoryStore, StoreError};

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Memory store whose opens take a while and record how many overlap.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ObjectStore for CountingStore {
        type Writer = MemoryWriter;

        async fn list_page(
            &self,
            prefix: &str,
            continuation: Option<&str>,
        ) -> Result<ListPage, StoreError> {
            self.inner.list_page(prefix, continuation).await
        }

        async fn open(&self, key: &str) -> Result<BoxReader, StoreError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let reader = self.inner.open(key).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            reader
        }

        async fn create(&self, key: &str) -> Result<MemoryWriter, StoreError> {
            self.inner.create(key).await
        }
    }

    #[tokio::test]
    async fn fetch_decodes_tweet() {
        let store = MemoryStore::new();
        store.insert("a.json", br#"{"id":1,"text":"oi"}"#.to_vec());
        let tweet = fetch_tweet(&store, "a.json", TIMEOUT).await.unwrap();
        assert_eq!(tweet.id, 1);
    }

    #[tokio::test]
    async fn fetch_reports_phase() {
        let store = MemoryStore::new();
        store.insert("bad.json", b"{\"id\":".to_vec());
        store.insert("reset.json", b"{\"id\":1}".to_vec());
        store.break_open("reset.json");

        let err = fetch_tweet(&store, "bad.json", TIMEOUT).await.unwrap_err();
        assert_eq!(err.phase, FetchPhase::Decode);

        let err = fetch_tweet(&store, "reset.json", TIMEOUT).await.unwrap_err();
        assert_eq!(err.phase, FetchPhase::Connect);
        assert!(matches!(err.kind, FetchErrorKind::Store(_)));

        let err = fetch_tweet(&store, "missing.json", TIMEOUT).await.unwrap_err();
        assert_eq!(err.phase, FetchPhase::Connect);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_read_times_out() {
        let store = MemoryStore::new();
        store.insert("slow.json", br#"{"id":1,"text":"stalls halfway"}"#.to_vec());
        store.stall("slow.json");

        let err = fetch_tweet(&store, "slow.json", TIMEOUT).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.phase, FetchPhase::Read);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_open_times_out_in_connect() {
        let store = MemoryStore::new();
        store.insert("late.json", b"{\"id\":1}".to_vec());
        store.delay_open("late.json", Duration::from_secs(60));

        let err = fetch_tweet(&store, "late.json", TIMEOUT).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.phase, FetchPhase::Connect);
    }

    #[tokio::test]
    async fn pool_closes_after_all_workers_finish() {
        let store = Arc::new(MemoryStore::new());
        let (key_tx, key_rx) = mpsc::channel(1);
        for i in 0..10 {
            store.insert(format!("{i}.json"), format!("{{\"id\":{i}}}").into_bytes());
        }

        let (mut results, pool) =
            spawn_pool(store.clone(), key_rx, 4, TIMEOUT, CancellationToken::new());
        tokio::spawn(async move {
            for i in 0..10 {
                key_tx.send(format!("{i}.json")).await.unwrap();
            }
        });

        let mut ids = Vec::new();
        while let Some(r) = results.recv().await {
            match r {
                FetchResult::Fetched { tweet, .. } => ids.push(tweet.id),
                FetchResult::Failed(e) => panic!("unexpected failure: {e}"),
            }
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..10).collect::<Vec<u64>>());
        assert_eq!(pool.join().await, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_fetches_never_exceed_pool_size() {
        let store = Arc::new(CountingStore::default());
        for i in 0..30 {
            store
                .inner
                .insert(format!("{i}.json"), format!("{{\"id\":{i}}}").into_bytes());
        }
        let (key_tx, key_rx) = mpsc::channel(1);
        let (mut results, pool) =
            spawn_pool(store.clone(), key_rx, 3, TIMEOUT, CancellationToken::new());
        tokio::spawn(async move {
            for i in 0..30 {
                key_tx.send(format!("{i}.json")).await.unwrap();
            }
        });

        let mut fetched = 0;
        while let Some(r) = results.recv().await {
            assert!(matches!(r, FetchResult::Fetched { .. }));
            fetched += 1;
        }
        assert_eq!(fetched, 30);
        assert_eq!(pool.join().await, 30);
        assert_eq!(store.peak.load(Ordering::SeqCst), 3);
        assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_pool_takes_no_more_keys() {
        let store = Arc::new(MemoryStore::new());
        store.insert("a.json", b"{\"id\":1}".to_vec());
        let (key_tx, key_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (mut results, pool) = spawn_pool(store.clone(), key_rx, 3, TIMEOUT, cancel);
        // Workers are gone, so the key is never taken
        let _ = key_tx.send("a.json".into()).await;
        assert!(results.recv().await.is_none());
        assert_eq!(pool.join().await, 0);
        assert_eq!(store.opens(), 0);
    }
}
