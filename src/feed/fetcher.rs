use crate::feed::parser::{parse_feed, ParseError, ParsedFeed};
use crate::storage::Source;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default per-fetch timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Default response body limit
pub const DEFAULT_MAX_FEED_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving and parsing one feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The source URL is not http or https
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request plus body read exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Feed document could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

impl FetchError {
    /// True when the payload arrived but was not a valid feed.
    pub fn is_parse(&self) -> bool {
        matches!(self, FetchError::Parse(_))
    }
}

/// Retrieves and parses feeds over HTTP.
///
/// One attempt per call; a failed source is simply picked up again on a later
/// cycle. Cloning shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl Fetcher {
    /// Build a fetcher with its own HTTP client.
    pub fn new(timeout: Duration, max_bytes: usize, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, timeout, max_bytes))
    }

    /// Build a fetcher around an existing client.
    pub fn with_client(client: reqwest::Client, timeout: Duration, max_bytes: usize) -> Self {
        Self {
            client,
            timeout,
            max_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch `source.url` and parse the payload.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] / [`FetchError::UnsupportedScheme`] - bad address
    /// - [`FetchError::Network`] - connection or TLS errors
    /// - [`FetchError::HttpStatus`] - non-2xx response
    /// - [`FetchError::Timeout`] - request and body took longer than the timeout
    /// - [`FetchError::ResponseTooLarge`] / [`FetchError::IncompleteResponse`] - body problems
    /// - [`FetchError::Parse`] - payload is not a valid feed
    pub async fn fetch(&self, source: &Source) -> Result<ParsedFeed, FetchError> {
        let url = Url::parse(&source.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme(url.scheme().to_string()));
        }

        let bytes = tokio::time::timeout(self.timeout, self.download(url))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;

        let feed = parse_feed(&bytes)?;
        tracing::debug!(
            source_id = source.id,
            items = feed.items.len(),
            bytes = bytes.len(),
            "Fetched feed"
        );
        Ok(feed)
    }

    async fn download(&self, url: Url) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.max_bytes).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
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
