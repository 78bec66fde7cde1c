use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::util::{validate_url, UrlValidationError};

const MAX_CONTENT_SIZE: usize = 5 * 1024 * 1024; // 5MB
const MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_REDIRECTS: usize = 3;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid UTF-8 in response")]
    InvalidUtf8,
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
}

impl ContentError {
    /// Returns true if this error is transient and the request should be retried.
    fn is_retryable(&self) -> bool {
        match self {
            ContentError::Timeout | ContentError::Network(_) => true,
            ContentError::HttpStatus(status) => *status >= 500,
            ContentError::ResponseTooLarge(_)
            | ContentError::InvalidUtf8
            | ContentError::InvalidUrl(_) => false,
        }
    }
}

/// Downloads article pages as HTML.
///
/// URLs come from the news API, so each one is checked against the SSRF
/// rules in [`validate_url`] before any request is made. Transient failures
/// (timeouts, connection errors, 5xx) are retried with exponential backoff.
#[derive(Clone)]
pub struct ContentFetcher {
    client: reqwest::Client,
    timeout: Duration,
    retry_delay: Duration,
    allow_private_hosts: bool,
}

impl ContentFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
            retry_delay: Duration::from_secs(1),
            allow_private_hosts: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base delay for retry backoff (doubles per attempt)
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Skip the localhost/private-network check. Only for pointing the
    /// fetcher at a local test server.
    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// Fetch the raw HTML of `url`.
    pub async fn fetch(&self, url: &str) -> Result<String, ContentError> {
        let url = if self.allow_private_hosts {
            Url::parse(url).map_err(UrlValidationError::from)?
        } else {
            validate_url(url)?
        };

        let mut retry_count = 0;
        loop {
            match self.fetch_once(&url).await {
                Ok(html) => {
                    tracing::debug!(host = ?url.host_str(), bytes = html.len(), "Article page fetched");
                    return Ok(html);
                }
                Err(e) if e.is_retryable() && retry_count < MAX_RETRIES => {
                    let delay = self.retry_delay * 2u32.pow(retry_count);
                    tracing::debug!(
                        error = %e,
                        retry = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying article fetch after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<String, ContentError> {
        let request = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ContentError::Timeout)?
            .map_err(ContentError::Network)?;

        if !response.status().is_success() {
            return Err(ContentError::HttpStatus(response.status().as_u16()));
        }

        read_limited_text(response, MAX_CONTENT_SIZE).await
    }
}

/// Redirect policy for the shared HTTP client: at most 3 hops, no loops,
/// and never into localhost or a private network.
pub fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }
        if let Err(e) = validate_url(url.as_str()) {
            return attempt.error(format!("Redirect blocked: {e}"));
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

async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, ContentError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ContentError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes).map_err(|_| ContentError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn local_fetcher() -> ContentFetcher {
        ContentFetcher::new(reqwest::Client::new())
            .allow_private_hosts(true)
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/story"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>Hello world</p>"))
            .mount(&mock_server)
            .await;

        let html = local_fetcher()
            .fetch(&format!("{}/story", mock_server.uri()))
            .await
            .unwrap();
        assert!(html.contains("Hello world"));
    }

    #[tokio::test]
    async fn test_localhost_rejected_by_default() {
        let fetcher = ContentFetcher::new(reqwest::Client::new());
        let result = fetcher.fetch("http://localhost/article").await;
        assert!(matches!(
            result,
            Err(ContentError::InvalidUrl(UrlValidationError::Localhost))
        ));
    }

    #[tokio::test]
    async fn test_private_ip_rejected() {
        let fetcher = ContentFetcher::new(reqwest::Client::new());
        assert!(fetcher.fetch("http://192.168.1.1/article").await.is_err());
        assert!(fetcher.fetch("http://10.0.0.1/article").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let result = local_fetcher().fetch("not-a-valid-url").await;
        assert!(matches!(result, Err(ContentError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_http_404_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = local_fetcher().fetch(&mock_server.uri()).await;
        assert!(matches!(result, Err(ContentError::HttpStatus(404))));
    }

    #[tokio::test]
    async fn test_http_500_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&mock_server)
            .await;

        let result = local_fetcher().fetch(&mock_server.uri()).await;
        assert!(matches!(result, Err(ContentError::HttpStatus(500))));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>ok</p>"))
            .mount(&mock_server)
            .await;

        let html = local_fetcher().fetch(&mock_server.uri()).await.unwrap();
        assert_eq!(html, "<p>ok</p>");
    }

    #[tokio::test]
    async fn test_response_too_large() {
        let mock_server = MockServer::start().await;
        let large_body = "x".repeat(MAX_CONTENT_SIZE + 1);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(large_body))
            .mount(&mock_server)
            .await;

        let result = local_fetcher().fetch(&mock_server.uri()).await;
        assert!(matches!(result, Err(ContentError::ResponseTooLarge(_))));
    }

    #[tokio::test]
    async fn test_redirect_into_private_network_blocked() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/moved"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", "http://192.168.0.10/admin"),
            )
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::builder()
            .redirect(redirect_policy())
            .build()
            .unwrap();
        let fetcher = ContentFetcher::new(client)
            .allow_private_hosts(true)
            .with_retry_delay(Duration::from_millis(1));

        let result = fetcher.fetch(&format!("{}/moved", mock_server.uri())).await;
        assert!(matches!(result, Err(ContentError::Network(_))));
    }

    #[tokio::test]
    async fn test_invalid_utf8() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0x00]))
            .mount(&mock_server)
            .await;

        let result = local_fetcher().fetch(&mock_server.uri()).await;
        assert!(matches!(result, Err(ContentError::InvalidUtf8)));
    }
}
