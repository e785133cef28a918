use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use thiserror::Error;

use super::parser::parse_feed;
use super::types::{FeedEndpoint, ParsedFeed};
use crate::util::validate_url;

const MAX_RETRIES: u32 = 2;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 5;

/// Errors that can occur while fetching a single endpoint.
///
/// A fetch error is local to its endpoint: the pipeline logs it and carries
/// on with the remaining sources.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The whole exchange exceeded the per-endpoint timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Outcome of fetching one endpoint, correlated with the endpoint itself.
#[derive(Debug)]
pub struct FetchResult {
    pub endpoint: FeedEndpoint,
    pub result: Result<ParsedFeed, FetchError>,
}

/// Something that can turn a feed endpoint into parsed entries.
///
/// The pipeline only talks to feeds through this trait, so tests can swap
/// in canned sources without a network.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetches and parses `endpoint`.
    ///
    /// `timeout` bounds the entire exchange (connect, retries, body, parse).
    async fn fetch(&self, endpoint: &FeedEndpoint, timeout: Duration) -> Result<ParsedFeed, FetchError>;
}

/// Builds the shared HTTP client used for feed retrieval.
///
/// - Limits redirects to 5 hops and rejects loops
/// - SEC-004: Every redirect target passes the same SSRF checks as a
///   caller-supplied URL, so a public feed cannot bounce into the private network
/// - Keeps a small idle pool per host (many feeds share a publisher)
pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("inkfeed/", env!("CARGO_PKG_VERSION")))
        .redirect(redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .build()
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        if let Err(e) = validate_url(url.as_str()) {
            tracing::warn!(to = %url, error = %e, "Refusing redirect to disallowed target");
            return attempt.error(e);
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Production [`FeedSource`] backed by `reqwest`.
///
/// # Behavior
///
/// - HTTP 429 and 5xx are retried with exponential backoff (1s, 2s), at most
///   2 retries, all inside the caller's timeout budget
/// - 4xx responses fail immediately
/// - Response bodies are limited to 10MB to prevent memory exhaustion
/// - At most `max_items` entries are kept per feed, in document order
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    max_items: usize,
}

impl HttpFeedSource {
    pub fn new(client: reqwest::Client, max_items: usize) -> Self {
        Self { client, max_items }
    }

    async fn fetch_inner(&self, endpoint: &FeedEndpoint) -> Result<ParsedFeed, FetchError> {
        let bytes = self.download(&endpoint.url).await?;

        let mut parsed = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

        let total = parsed.entries.len();
        if total > self.max_items {
            parsed.entries.truncate(self.max_items);
            tracing::debug!(
                endpoint = %endpoint.url,
                total,
                kept = self.max_items,
                "Capped feed entries"
            );
        }

        Ok(parsed)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;

        loop {
            let response = self.client.get(url).send().await?;
            let status = response.status();

            // EDGE-004: Rate limiting and server errors back off exponentially
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        FetchError::RateLimited(MAX_RETRIES)
                    } else {
                        FetchError::HttpStatus(status.as_u16())
                    });
                }

                let delay_secs = 2u64.pow(retry_count); // 1s, 2s
                tracing::warn!(
                    endpoint = %url,
                    status = %status,
                    retry = retry_count,
                    delay_secs,
                    "Upstream busy, retrying after delay"
                );

                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, MAX_FEED_SIZE).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    // EDGE-005: Truncated downloads are retried like 5xx
                    if retry_count >= MAX_RETRIES {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }

                    let delay_secs = 2u64.pow(retry_count);
                    tracing::debug!(
                        endpoint = %url,
                        expected,
                        received,
                        attempt = retry_count + 1,
                        delay_secs,
                        "Retrying incomplete download"
                    );

                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, endpoint: &FeedEndpoint, timeout: Duration) -> Result<ParsedFeed, FetchError> {
        tokio::time::timeout(timeout, self.fetch_inner(endpoint))
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
