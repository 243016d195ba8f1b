use crate::feed::parser::{parse_feed, FeedEntry};
use crate::feed::sources::FeedSource;
use crate::retry::RetryPolicy;
use futures::stream::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::error::Elapsed;

/// Default per-request timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Default response body limit (10MB).
pub const DEFAULT_MAX_FEED_BYTES: usize = 10 * 1024 * 1024;

/// What went wrong while fetching or parsing one feed.
#[derive(Debug, Error)]
pub enum FetchErrorKind {
    /// DNS, connect, TLS or body transfer failure.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Feed server answered with a non-2xx status.
    #[error("Feed server returned HTTP {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Body is not RSS, Atom or JSON Feed.
    #[error("Not a valid feed: {0}")]
    Parse(String),
    /// Still answering 429 once the retry policy ran out.
    #[error("Feed server kept rate limiting after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Fewer bytes arrived than `Content-Length` announced.
    #[error("Truncated body: {received} of {expected} bytes")]
    IncompleteResponse { expected: u64, received: usize },
}

/// A failed fetch of one feed source. Local to that source: callers log it
/// and move on to the next one.
#[derive(Debug, Error)]
#[error("Failed to fetch feed '{title}' ({url}): {kind}")]
pub struct FetchError {
    pub title: String,
    pub url: String,
    #[source]
    pub kind: FetchErrorKind,
}

/// Retrieves and parses feeds over HTTP.
///
/// Cheap to clone: the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
    timeout: Duration,
    max_bytes: usize,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            retry: RetryPolicy::fetch_default(),
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_bytes: DEFAULT_MAX_FEED_BYTES,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Fetches one source and returns its entries in document order.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] naming the source with one of:
    /// - [`FetchErrorKind::Network`] - Connection or TLS errors
    /// - [`FetchErrorKind::Timeout`] - Request exceeded the timeout
    /// - [`FetchErrorKind::HttpStatus`] - Non-2xx response (5xx after retries)
    /// - [`FetchErrorKind::RateLimited`] - 429 response after max retries
    /// - [`FetchErrorKind::ResponseTooLarge`] - Body exceeded the size limit
    /// - [`FetchErrorKind::IncompleteResponse`] - Truncated body after retries
    /// - [`FetchErrorKind::Parse`] - Not a valid feed document
    pub async fn fetch(&self, source: &FeedSource) -> Result<Vec<FeedEntry>, FetchError> {
        self.fetch_entries(source).await.map_err(|kind| FetchError {
            title: source.label().to_string(),
            url: source.url.clone(),
            kind,
        })
    }

    async fn fetch_entries(&self, source: &FeedSource) -> Result<Vec<FeedEntry>, FetchErrorKind> {
        let bytes = self.fetch_bytes(&source.url).await?;
        let entries = parse_feed(&bytes).map_err(|e| FetchErrorKind::Parse(e.to_string()))?;

        tracing::debug!(
            feed = %source.url,
            entries = entries.len(),
            "Parsed feed"
        );
        Ok(entries)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchErrorKind> {
        let mut retry_count = 0;

        loop {
            // One deadline per attempt, covering the headers and the body.
            let deadline = tokio::time::Instant::now() + self.timeout;
            let timed_out = |_: Elapsed| FetchErrorKind::Timeout(self.timeout);

            let response = tokio::time::timeout_at(deadline, self.client.get(url).send())
                .await
                .map_err(timed_out)?
                .map_err(FetchErrorKind::Network)?;

            let status = response.status();

            // Rate limiting and server errors back off and retry
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let Some(delay) = self.retry.next_delay(retry_count) else {
                    return Err(if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        FetchErrorKind::RateLimited(self.retry.max_retries)
                    } else {
                        FetchErrorKind::HttpStatus(status.as_u16())
                    });
                };

                tracing::warn!(
                    feed = %url,
                    status = %status,
                    retry = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Feed server error, retrying after delay"
                );

                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx errors fail immediately
            if !status.is_success() {
                return Err(FetchErrorKind::HttpStatus(status.as_u16()));
            }

            let body = tokio::time::timeout_at(deadline, read_limited_bytes(response, self.max_bytes))
                .await
                .map_err(timed_out)?;
            match body {
                Ok(bytes) => return Ok(bytes),
                Err(FetchErrorKind::IncompleteResponse { expected, received }) => {
                    let Some(delay) = self.retry.next_delay(retry_count) else {
                        return Err(FetchErrorKind::IncompleteResponse { expected, received });
                    };

                    tracing::debug!(
                        feed = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );

                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Streams the body into memory, failing once it grows past `limit`.
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchErrorKind> {
    let announced = response.content_length();
    if announced.is_some_and(|len| len > limit as u64) {
        return Err(FetchErrorKind::ResponseTooLarge(limit));
    }

    let mut body = Vec::with_capacity(announced.map_or(0, |len| len as usize));
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > limit {
            return Err(FetchErrorKind::ResponseTooLarge(limit));
        }
        body.extend_from_slice(&chunk);
    }

    match announced {
        Some(expected) if (body.len() as u64) < expected => {
            Err(FetchErrorKind::IncompleteResponse {
                expected,
                received: body.len(),
            })
        }
        _ => Ok(body),
    }
}
