use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::response::{decode_error, decode_page, PageResponse};
use crate::util::{validate_api_base, UrlValidationError};

pub const DEFAULT_BASE_URL: &str = "https://newsapi.org";

/// Articles per page requested from the API
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// NewsAPI rejects page sizes above this
const MAX_PAGE_SIZE: u32 = 100;

const MAX_RETRIES: u32 = 3;
const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the remote news API.
///
/// The message of every variant is safe to show to users; none of them
/// carries the API key.
#[derive(Debug, Error)]
pub enum NewsError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Non-2xx response without a usable error body
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// The API answered with `"status": "error"`
    #[error("News API error ({code}): {message}")]
    Api { code: String, message: String },
    /// Body was not the expected JSON
    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    /// Response body exceeded the 5MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    #[error("No news API key configured (set NEWS_API_KEY or api_key in config.toml)")]
    MissingApiKey,
    #[error(transparent)]
    InvalidBaseUrl(#[from] UrlValidationError),
}

impl NewsError {
    /// True when the failure means the network path is down rather than
    /// the service refusing the request.
    pub fn is_connectivity(&self) -> bool {
        match self {
            NewsError::Timeout => true,
            NewsError::Network(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// The remote side of the sync controller: one page of headlines or search
/// results per call.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Top headlines for a two-letter country code
    async fn top_headlines(&self, country: &str, page: u32) -> Result<PageResponse, NewsError>;

    /// Full-text search across all articles
    async fn search(&self, query: &str, page: u32) -> Result<PageResponse, NewsError>;
}

/// [`NewsSource`] backed by the NewsAPI v2 HTTP API.
///
/// # Behavior
///
/// - The key is sent as the `X-Api-Key` header, never in the query string
/// - Each request has a 30-second timeout (configurable)
/// - HTTP 429 and 5xx responses are retried with exponential backoff, up to 3 times
/// - Response bodies are limited to 5MB
pub struct NewsApiClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
    page_size: u32,
    timeout: Duration,
    retry_delay: Duration,
}

impl NewsApiClient {
    /// # Errors
    ///
    /// [`NewsError::InvalidBaseUrl`] if `base_url` is not HTTPS (loopback
    /// hosts excepted), [`NewsError::MissingApiKey`] if the key is blank.
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: SecretString,
    ) -> Result<Self, NewsError> {
        let mut base_url = validate_api_base(base_url)?;
        if api_key.expose_secret().trim().is_empty() {
            return Err(NewsError::MissingApiKey);
        }

        // Url::join replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            api_key,
            page_size: DEFAULT_PAGE_SIZE,
            timeout: DEFAULT_TIMEOUT,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Page size sent with every request, clamped to 1..=100
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base delay for retry backoff (doubles per attempt: 1s, 2s, 4s by default)
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)], page: u32) -> Result<Url, NewsError> {
        let mut url = self.base_url.join(path).map_err(UrlValidationError::from)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("page", &page.max(1).to_string());
            pairs.append_pair("pageSize", &self.page_size.to_string());
        }
        Ok(url)
    }

    async fn get_page(&self, url: Url) -> Result<PageResponse, NewsError> {
        let mut retry_count = 0;

        loop {
            tracing::debug!(endpoint = %url.path(), attempt = retry_count + 1, "Requesting news page");

            let request = self
                .client
                .get(url.clone())
                .header("X-Api-Key", self.api_key.expose_secret())
                .send();
            let response = tokio::time::timeout(self.timeout, request)
                .await
                .map_err(|_| NewsError::Timeout)?
                .map_err(NewsError::Network)?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        NewsError::RateLimited(MAX_RETRIES)
                    } else {
                        NewsError::HttpStatus(status.as_u16())
                    });
                }

                let delay = self.retry_delay * 2u32.pow(retry_count);
                tracing::warn!(
                    endpoint = %url.path(),
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "News API unavailable, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            let body = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;

            // 4xx fail immediately, preferring the API's own message
            if !status.is_success() {
                return Err(decode_error(&body).unwrap_or(NewsError::HttpStatus(status.as_u16())));
            }

            let page = decode_page(&body)?;
            tracing::debug!(
                endpoint = %url.path(),
                articles = page.articles.len(),
                total = page.total_results,
                "News page received"
            );
            return Ok(page);
        }
    }
}

#[async_trait]
impl NewsSource for NewsApiClient {
    async fn top_headlines(&self, country: &str, page: u32) -> Result<PageResponse, NewsError> {
        let url = self.endpoint("v2/top-headlines", &[("country", country)], page)?;
        self.get_page(url).await
    }

    async fn search(&self, query: &str, page: u32) -> Result<PageResponse, NewsError> {
        let url = self.endpoint("v2/everything", &[("q", query)], page)?;
        self.get_page(url).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, NewsError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(NewsError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(NewsError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(NewsError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
