use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
    /// An API base URL that would send the key in clear text.
    #[error("Insecure API base URL: HTTPS required (except localhost)")]
    InsecureBase,
}

/// Validates an article URL before the content fetcher requests it.
///
/// Article URLs come from a third-party API, so anything that could reach
/// internal services is rejected:
/// - Non-HTTP(S) schemes (e.g., `file://`, `ftp://`)
/// - Localhost addresses (`localhost`, `127.0.0.1`, `::1`)
/// - Private IP ranges (RFC 1918, link-local, unique local IPv6)
///
/// # Examples
///
/// ```
/// use newsdesk::util::validate_url;
///
/// assert!(validate_url("https://example.com/story").is_ok());
/// assert!(validate_url("http://localhost/story").is_err());
/// assert!(validate_url("http://192.168.1.1/story").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = parse_http_url(url_str)?;

    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(UrlValidationError::Localhost);
        }
        if let Some(ip) = host_ip(host) {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(url)
}

/// Validates the news API base URL.
///
/// The API key travels with every request, so plain HTTP is only accepted
/// for loopback hosts (local mocks and proxies).
///
/// ```
/// use newsdesk::util::validate_api_base;
///
/// assert!(validate_api_base("https://newsapi.org").is_ok());
/// assert!(validate_api_base("http://127.0.0.1:8080").is_ok());
/// assert!(validate_api_base("http://newsapi.org").is_err());
/// ```
pub fn validate_api_base(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = parse_http_url(url_str)?;

    if url.scheme() == "http" {
        let loopback = match url.host_str() {
            Some("localhost") => true,
            Some(host) => host_ip(host).is_some_and(|ip| ip.is_loopback()),
            None => false,
        };
        if !loopback {
            return Err(UrlValidationError::InsecureBase);
        }
    }

    Ok(url)
}

fn parse_http_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// IP literal in a host, with IPv6 brackets stripped
fn host_ip(host: &str) -> Option<IpAddr> {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
        .parse()
        .ok()
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let first = ipv6.segments()[0];
            // Unique Local (fc00::/7) or Link-Local (fe80::/10)
            (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}
