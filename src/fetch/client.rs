use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_LOCATION, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    REFERER,
};
use thiserror::Error;
use tokio::sync::Mutex;

use super::cache::{CachedResponse, ResponseCache};
use crate::config::Config;

const MAX_RETRIES: u32 = 2;
const RETRY_BASE: Duration = Duration::from_millis(500);
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors surfaced by the fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response status outside 2xx and not in the request's allowlist
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("response too large")]
    ResponseTooLarge,
    /// Reading or writing the on-disk response cache failed
    #[error("cache error: {0}")]
    Cache(#[from] std::io::Error),
}

/// One fetch as the traversal engine issues it: a URL plus the few knobs
/// that vary between requests.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub referer: Option<String>,
    /// Non-2xx statuses handed back as ordinary responses instead of errors.
    pub status_allowlist: Vec<u16>,
    /// Serve any cached copy without revalidation. Archive pages are
    /// immutable, so their requests always set this.
    pub max_stale: bool,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            referer: None,
            status_allowlist: Vec::new(),
            max_stale: false,
        }
    }

    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn allow_status(mut self, status: u16) -> Self {
        self.status_allowlist.push(status);
        self
    }

    pub fn max_stale(mut self) -> Self {
        self.max_stale = true;
        self
    }
}

/// A fetched (or cache-served) HTTP response.
///
/// `Content-Location` is always present in `headers`: when the origin did
/// not send one, the final request URL is written in, so extracting the
/// effective URL downstream is idempotent.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

enum NetworkOutcome {
    /// 304 against the cached validators; the stored entry is authoritative.
    NotModified,
    Fresh { page: FetchedPage, max_age: u64 },
}

/// HTTP fetcher with a shared on-disk response cache.
///
/// Requests for the same fetcher are spaced by the configured download
/// delay and run one at a time; cache hits skip the wait entirely. The
/// shared cache is what keeps source expansion after a traversal from
/// touching the network again.
#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    cache: ResponseCache,
    timeout: Duration,
    download_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self {
            client,
            cache: ResponseCache::open(&config.cache_dir)?,
            timeout: Duration::from_secs(config.request_timeout_secs),
            download_delay: Duration::from_millis(config.download_delay_ms),
            last_request: Mutex::new(None),
        })
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchedPage, FetchError> {
        let cached = self.cache.load(&request.url)?;

        if let Some(entry) = &cached {
            if request.max_stale || entry.is_fresh() {
                tracing::debug!(url = %request.url, "serving cached response");
                return Ok(entry.to_page());
            }
        }

        if let Some(mut entry) = cached {
            // stale copy on disk: revalidate with its stored validators
            match self.network_fetch(&request, Some(&entry)).await? {
                NetworkOutcome::NotModified => {
                    tracing::debug!(url = %request.url, "revalidated cached response");
                    self.cache.touch(&request.url, &mut entry)?;
                    return Ok(entry.to_page());
                }
                NetworkOutcome::Fresh { page, max_age } => {
                    self.cache.store(&request.url, &page, max_age)?;
                    return Ok(page);
                }
            }
        }

        match self.network_fetch(&request, None).await? {
            NetworkOutcome::Fresh { page, max_age } => {
                self.cache.store(&request.url, &page, max_age)?;
                Ok(page)
            }
            // unsolicited 304 with nothing cached
            NetworkOutcome::NotModified => Err(FetchError::HttpStatus(304)),
        }
    }

    async fn network_fetch(
        &self,
        request: &FetchRequest,
        cached: Option<&CachedResponse>,
    ) -> Result<NetworkOutcome, FetchError> {
        let mut retry = 0;

        loop {
            self.polite_wait().await;

            let mut builder = self.client.get(request.url.as_str());
            if let Some(referer) = &request.referer {
                builder = builder.header(REFERER, referer.as_str());
            }
            if let Some(entry) = cached {
                if let Some(etag) = entry.header("etag") {
                    builder = builder.header(IF_NONE_MATCH, etag);
                }
                if let Some(modified) = entry.header("last-modified") {
                    builder = builder.header(IF_MODIFIED_SINCE, modified);
                }
            }

            let response = tokio::time::timeout(self.timeout, builder.send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status().as_u16();

            if status == 304 && cached.is_some() {
                return Ok(NetworkOutcome::NotModified);
            }

            if response.status().is_success() || request.status_allowlist.contains(&status) {
                let max_age = freshness_lifetime(response.headers());
                let page = read_page(response).await?;
                return Ok(NetworkOutcome::Fresh { page, max_age });
            }

            // 429 and 5xx get a bounded exponential backoff
            if (status == 429 || (500..600).contains(&status)) && retry < MAX_RETRIES {
                let delay = RETRY_BASE * 2u32.pow(retry);
                tracing::warn!(
                    url = %request.url,
                    status = status,
                    retry = retry,
                    delay_ms = delay.as_millis() as u64,
                    "server error, backing off"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
                continue;
            }

            return Err(FetchError::HttpStatus(status));
        }
    }

    /// Space network requests by the configured delay. Holding the slot
    /// across the sleep also caps network concurrency at one request, which
    /// is the politeness the delay is meant to provide.
    async fn polite_wait(&self) {
        if self.download_delay.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.download_delay {
                tokio::time::sleep(self.download_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

async fn read_page(response: reqwest::Response) -> Result<FetchedPage, FetchError> {
    let final_url = response.url().to_string();
    let status = response.status().as_u16();
    let mut headers = response.headers().clone();

    if let Some(length) = response.content_length() {
        if length as usize > MAX_BODY_SIZE {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if body.len().saturating_add(chunk.len()) > MAX_BODY_SIZE {
            return Err(FetchError::ResponseTooLarge);
        }
        body.extend_from_slice(&chunk);
    }

    if !headers.contains_key(CONTENT_LOCATION) {
        if let Ok(value) = HeaderValue::from_str(&final_url) {
            headers.insert(CONTENT_LOCATION, value);
        }
    }

    Ok(FetchedPage {
        final_url,
        status,
        headers,
        body,
    })
}

fn freshness_lifetime(headers: &HeaderMap) -> u64 {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|directive| {
            directive
                .trim()
                .strip_prefix("max-age=")
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config(name: &str) -> Config {
        let cache_dir = std::env::temp_dir().join(format!("refeed_client_test_{name}"));
        let _ = std::fs::remove_dir_all(&cache_dir);
        Config {
            cache_dir,
            download_delay_ms: 0,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_fills_in_content_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<feed/>"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config("content_location")).unwrap();
        let url = format!("{}/feed", server.uri());
        let page = fetcher.fetch(FetchRequest::new(&url)).await.unwrap();

        assert_eq!(page.status, 200);
        assert_eq!(page.body, b"<feed/>");
        assert_eq!(
            page.headers.get(CONTENT_LOCATION).unwrap().to_str().unwrap(),
            url
        );
    }

    #[tokio::test]
    async fn test_status_outside_allowlist_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config("status_error")).unwrap();
        let url = format!("{}/feed", server.uri());

        let err = fetcher.fetch(FetchRequest::new(&url)).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(404)));

        let page = fetcher
            .fetch(FetchRequest::new(&url).allow_status(404))
            .await
            .unwrap();
        assert_eq!(page.status, 404);
    }

    #[tokio::test]
    async fn test_max_stale_serves_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("first"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config("max_stale")).unwrap();
        let url = format!("{}/feed", server.uri());

        let first = fetcher.fetch(FetchRequest::new(&url)).await.unwrap();
        assert_eq!(first.body, b"first");

        let second = fetcher
            .fetch(FetchRequest::new(&url).max_stale())
            .await
            .unwrap();
        assert_eq!(second.body, b"first");

        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_revalidation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("cacheable")
                    .insert_header("Cache-Control", "max-age=3600"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config("fresh")).unwrap();
        let url = format!("{}/feed", server.uri());

        fetcher.fetch(FetchRequest::new(&url)).await.unwrap();
        fetcher.fetch(FetchRequest::new(&url)).await.unwrap();

        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_revalidates_with_etag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("versioned")
                    .insert_header("ETag", "\"v1\""),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config("revalidate")).unwrap();
        let url = format!("{}/feed", server.uri());

        let first = fetcher.fetch(FetchRequest::new(&url)).await.unwrap();
        assert_eq!(first.body, b"versioned");

        // no freshness lifetime granted, so this goes conditional and the
        // 304 hands back the stored body
        let second = fetcher.fetch(FetchRequest::new(&url)).await.unwrap();
        assert_eq!(second.body, b"versioned");

        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_server_error_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3) // initial request + 2 retries
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config("retries")).unwrap();
        let url = format!("{}/feed", server.uri());

        let err = fetcher.fetch(FetchRequest::new(&url)).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(500)));
    }
}
