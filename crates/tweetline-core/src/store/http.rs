//! S3/GCS-compatible XML API backend over HTTP.
//!
//! Listing uses ListObjectsV2 (`list-type=2`), reads stream the `GET` body,
//! writes spool to a local temp file and `PUT` it on commit.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::StreamExt;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Url;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use super::{BoxReader, DEFAULT_PAGE_SIZE, ListPage, ObjectEntry, ObjectStore, ObjectWriter};
use crate::error::StoreError;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<Result<reqwest::Client, String>> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(32)
        .build()
        .map_err(|e| e.to_string())
});

/// Get shared HTTP client.
pub fn http_client() -> Result<&'static reqwest::Client, StoreError> {
    SHARED_CLIENT.as_ref().map_err(|message| StoreError::Http {
        status: None,
        message: format!("failed to build HTTP client: {message}"),
    })
}

/// Bucket on an XML-API object store (`<endpoint>/<bucket>/<key>`).
#[derive(Debug, Clone)]
pub struct HttpStore {
    endpoint: Url,
    bucket: String,
    token: Option<String>,
    page_size: usize,
}

impl HttpStore {
    pub fn new(endpoint: &str, bucket: &str) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint).map_err(|e| StoreError::Http {
            status: None,
            message: format!("invalid endpoint {endpoint:?}: {e}"),
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(StoreError::Http {
                status: None,
                message: format!("endpoint cannot be a base URL: {endpoint}"),
            });
        }
        Ok(Self {
            endpoint,
            bucket: bucket.to_string(),
            token: None,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn url(&self, key: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.bucket);
            if let Some(key) = key {
                segments.extend(key.split('/'));
            }
        }
        url
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

impl ObjectStore for HttpStore {
    type Writer = SpoolWriter;

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let max_keys = self.page_size.to_string();
        let mut req = http_client()?.get(self.url(None)).query(&[
            ("list-type", "2"),
            ("prefix", prefix),
            ("max-keys", max_keys.as_str()),
        ]);
        if let Some(token) = continuation {
            req = req.query(&[("continuation-token", token)]);
        }
        let body = self
            .authorize(req)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StoreError::from_reqwest(&e))?
            .text()
            .await
            .map_err(|e| StoreError::from_reqwest(&e))?;
        parse_list_response(&body)
    }

    async fn open(&self, key: &str) -> Result<BoxReader, StoreError> {
        let response = self
            .authorize(http_client()?.get(self.url(Some(key))))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StoreError::from_reqwest(&e))?;

        // Convert response body stream to AsyncRead
        let stream = response.bytes_stream();
        let reader = tokio_util::io::StreamReader::new(
            stream.map(|result| result.map_err(io::Error::other)),
        );
        Ok(Box::pin(reader))
    }

    async fn create(&self, key: &str) -> Result<SpoolWriter, StoreError> {
        let spool_path = spool_path();
        let file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&spool_path)
            .await?;
        Ok(SpoolWriter {
            file,
            spool_path,
            store: self.clone(),
            key: key.to_string(),
            bytes: 0,
        })
    }
}

fn spool_path() -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tweetline-{}-{seq}.spool", std::process::id()))
}

/// Writes to a local spool file; `finish` uploads it with a single `PUT`.
#[derive(Debug)]
pub struct SpoolWriter {
    file: File,
    spool_path: PathBuf,
    store: HttpStore,
    key: String,
    bytes: u64,
}

impl AsyncWrite for SpoolWriter {
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

impl ObjectWriter for SpoolWriter {
    async fn finish(mut self) -> Result<u64, StoreError> {
        let result = self.upload().await;
        if let Err(e) = tokio::fs::remove_file(&self.spool_path).await {
            log::debug!("Failed to remove spool {}: {e}", self.spool_path.display());
        }
        result
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
        if let Err(e) = tokio::fs::remove_file(&self.spool_path).await {
            log::debug!("Failed to remove spool {}: {e}", self.spool_path.display());
        }
    }
}

impl SpoolWriter {
    async fn upload(&mut self) -> Result<u64, StoreError> {
        self.file.flush().await?;
        self.file.rewind().await?;
        let file = self.file.try_clone().await?;
        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));
        self.store
            .authorize(http_client()?.put(self.store.url(Some(&self.key))))
            .header(reqwest::header::CONTENT_LENGTH, self.bytes)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StoreError::from_reqwest(&e))?;
        Ok(self.bytes)
    }
}

/// Parse a ListObjectsV2 `ListBucketResult` document.
pub fn parse_list_response(xml: &str) -> Result<ListPage, StoreError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListPage::default();
    let mut truncated = false;
    let mut in_contents = false;
    let mut field: Option<Vec<u8>> = None;
    let mut key: Option<String> = None;
    let mut size: Option<u64> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if name == b"Contents" {
                    in_contents = true;
                    key = None;
                    size = None;
                }
                field = Some(name);
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                match field.as_deref() {
                    Some(b"Key") if in_contents => key = Some(text.into_owned()),
                    Some(b"Size") if in_contents => {
                        size = Some(text.trim().parse().map_err(|_| {
                            StoreError::Xml(format!("invalid object size {text:?}"))
                        })?);
                    }
                    Some(b"IsTruncated") => truncated = text.trim() == "true",
                    Some(b"NextContinuationToken") => page.next = Some(text.into_owned()),
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.name().as_ref() == b"Contents" {
                    in_contents = false;
                    let k = key
                        .take()
                        .ok_or_else(|| StoreError::Xml("Contents without Key".into()))?;
                    page.entries.push(ObjectEntry::new(k, size.take().unwrap_or(0)));
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !truncated {
        page.next = None;
    } else if page.next.is_none() {
        return Err(StoreError::Xml(
            "truncated listing without NextContinuationToken".into(),
        ));
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRUNCATED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>prefs-2020</Name>
  <Prefix>tweets/dt=2020-10-01/</Prefix>
  <KeyCount>2</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>abc&amp;def</NextContinuationToken>
  <Contents>
    <Key>tweets/dt=2020-10-01/</Key>
    <Size>0</Size>
  </Contents>
  <Contents>
    <Key>tweets/dt=2020-10-01/0a1b.json</Key>
    <LastModified>2020-10-01T12:00:00.000Z</LastModified>
    <Size>2048</Size>
  </Contents>
</ListBucketResult>"#;

    #[test]
    fn parse_truncated_page() {
        let page = parse_list_response(TRUNCATED).unwrap();
        assert_eq!(
            page.entries,
            vec![
                ObjectEntry::new("tweets/dt=2020-10-01/", 0),
                ObjectEntry::new("tweets/dt=2020-10-01/0a1b.json", 2048),
            ]
        );
        assert_eq!(page.next.as_deref(), Some("abc&def"));
    }

    #[test]
    fn parse_last_page_has_no_next() {
        let xml = r#"<ListBucketResult>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>a.json</Key><Size>3</Size></Contents>
</ListBucketResult>"#;
        let page = parse_list_response(xml).unwrap();
        assert_eq!(page.entries, vec![ObjectEntry::new("a.json", 3)]);
        assert!(page.next.is_none());
    }

    #[test]
    fn parse_empty_listing() {
        let xml = "<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>";
        let page = parse_list_response(xml).unwrap();
        assert!(page.entries.is_empty());
    }

    #[test]
    fn parse_rejects_bad_size() {
        let xml = "<ListBucketResult><Contents><Key>a</Key><Size>big</Size></Contents></ListBucketResult>";
        assert!(matches!(parse_list_response(xml), Err(StoreError::Xml(_))));
    }

    #[test]
    fn parse_rejects_truncated_without_token() {
        let xml = "<ListBucketResult><IsTruncated>true</IsTruncated></ListBucketResult>";
        assert!(parse_list_response(xml).is_err());
    }

    #[test]
    fn object_url_encodes_segments() {
        let store = HttpStore::new("https://storage.googleapis.com", "prefs-2020").unwrap();
        assert_eq!(
            store.url(Some("tweets/dt=2020-10-01/a b.json")).as_str(),
            "https://storage.googleapis.com/prefs-2020/tweets/dt=2020-10-01/a%20b.json"
        );
        assert_eq!(
            store.url(None).as_str(),
            "https://storage.googleapis.com/prefs-2020"
        );
    }

    #[test]
    fn invalid_endpoint_rejected() {
        assert!(HttpStore::new("not a url", "b").is_err());
        assert!(HttpStore::new("mailto:someone", "b").is_err());
    }
}
