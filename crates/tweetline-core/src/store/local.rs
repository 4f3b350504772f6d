//! Local directory backend with atomic staged→rename commits

use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::fs::{self, File};
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use super::{BoxReader, DEFAULT_PAGE_SIZE, ListPage, ObjectEntry, ObjectStore, ObjectWriter};
use crate::error::StoreError;

/// Directory under the root holding in-progress writes; never listed
pub const STAGING_DIR: &str = ".tweetline-tmp";

/// Sorted entries of the last prefix scanned, reused by continuation pages
#[derive(Debug)]
struct CachedListing {
    prefix: String,
    entries: Arc<[ObjectEntry]>,
}

/// Object store rooted at a local directory. Keys are `/`-separated paths
/// relative to the root.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    page_size: usize,
    listing: Arc<Mutex<Option<CachedListing>>>,
}

impl LocalStore {
    /// `.` components are dropped from `root`, so `./data`, `data/` and
    /// `data` name the same store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        Self {
            root: root
                .components()
                .filter(|c| !matches!(c, Component::CurDir))
                .collect(),
            page_size: DEFAULT_PAGE_SIZE,
            listing: Arc::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path under the root, rejecting escapes.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if !is_relative_key(key) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid object key: {key:?}"),
            )));
        }
        Ok(self.root.join(key))
    }

    /// Entries under `prefix`, scanned afresh when a listing starts and
    /// served from the cache for its continuation pages.
    async fn entries(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<Arc<[ObjectEntry]>, StoreError> {
        if continuation.is_some() {
            let cached = self.listing.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(listing) = cached.as_ref().filter(|l| l.prefix == prefix) {
                return Ok(listing.entries.clone());
            }
        }

        let root = self.root.clone();
        let owned_prefix = prefix.to_string();
        let entries: Arc<[ObjectEntry]> =
            tokio::task::spawn_blocking(move || scan(&root, &owned_prefix))
                .await
                .map_err(io::Error::other)??
                .into();
        *self.listing.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedListing {
            prefix: prefix.to_string(),
            entries: entries.clone(),
        });
        Ok(entries)
    }
}

fn is_relative_key(key: &str) -> bool {
    !key.is_empty()
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Deepest directory that holds every key starting with `prefix`.
fn prefix_dir(prefix: &str) -> &str {
    let dir = prefix.rfind('/').map_or("", |i| &prefix[..i]);
    if is_relative_key(dir) { dir } else { "" }
}

/// Walk the files under the prefix directory and return sorted entries
/// matching `prefix`.
fn scan(root: &Path, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
    let base = root.join(prefix_dir(prefix));
    let base_str = base.to_str().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("non UTF-8 store path: {}", base.display()),
        )
    })?;
    let sep = if base_str.is_empty() || base_str.ends_with('/') {
        ""
    } else {
        "/"
    };
    let pattern = format!("{}{sep}**/*", glob::Pattern::escape(base_str));
    let paths = glob::glob(&pattern).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut entries = Vec::new();
    for path in paths {
        let path = path.map_err(|e| StoreError::Io(e.into_error()))?;
        let Some(key) = key_for(root, &path) else {
            continue;
        };
        if !key.starts_with(prefix) || key.split('/').next() == Some(STAGING_DIR) {
            continue;
        }
        let meta = std::fs::metadata(&path)?;
        if meta.is_file() {
            entries.push(ObjectEntry::new(key, meta.len()));
        }
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

fn key_for(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

impl ObjectStore for LocalStore {
    type Writer = LocalWriter;

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let entries = self.entries(prefix, continuation).await?;
        Ok(super::page_after(&entries, continuation, self.page_size))
    }

    async fn open(&self, key: &str) -> Result<BoxReader, StoreError> {
        let path = self.path_for(key)?;
        let file = File::open(&path)
            .await
            .map_err(|e| StoreError::from_io(key, e))?;
        Ok(Box::pin(file))
    }

    async fn create(&self, key: &str) -> Result<LocalWriter, StoreError> {
        let final_path = self.path_for(key)?;
        let tmp_path = self.root.join(STAGING_DIR).join(key);
        for dir in [final_path.parent(), tmp_path.parent()].into_iter().flatten() {
            fs::create_dir_all(dir).await?;
        }

        // Clean up stale staged file
        if fs::try_exists(&tmp_path).await? {
            log::warn!("Removing stale staged file: {}", tmp_path.display());
            fs::remove_file(&tmp_path).await?;
        }

        let file = File::create(&tmp_path).await?;
        Ok(LocalWriter {
            file,
            tmp_path,
            final_path,
            bytes: 0,
        })
    }
}

/// Writer to `<root>/.tweetline-tmp/<key>`, renamed to `<key>` on
/// [`finish`](ObjectWriter::finish)
#[derive(Debug)]
pub struct LocalWriter {
    file: File,
    tmp_path: PathBuf,
    final_path: PathBuf,
    bytes: u64,
}

impl AsyncWrite for LocalWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.file).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.bytes += n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

impl ObjectWriter for LocalWriter {
    async fn finish(mut self) -> Result<u64, StoreError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        fs::rename(&self.tmp_path, &self.final_path).await?;
        Ok(self.bytes)
    }

    async fn truncate(&mut self, len: u64) -> Result<(), StoreError> {
        self.file.flush().await?;
        self.file.set_len(len).await?;
        self.file.seek(io::SeekFrom::Start(len)).await?;
        self.bytes = len;
        Ok(())
    }

    async fn abort(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.tmp_path).await {
            log::warn!("Failed to remove {}: {e}", self.tmp_path.display());
        }
    }
}
