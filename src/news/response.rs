use serde::{Deserialize, Serialize};

use super::client::NewsError;
use crate::storage::Article;
use crate::util::collapse_whitespace;

/// `status` field of every NewsAPI response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// One page of results from the headlines or search endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse {
    pub status: ResponseStatus,
    /// Total matches across all pages, as reported by the API
    pub total_results: u64,
    pub articles: Vec<Article>,
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: ResponseStatus,
    #[serde(default)]
    total_results: u64,
    #[serde(default)]
    articles: Vec<ApiArticle>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiArticle {
    #[serde(default)]
    source: ApiSource,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSource {
    name: Option<String>,
}

impl ApiArticle {
    /// Articles without a URL have no identity and are dropped.
    fn into_article(self) -> Option<Article> {
        let url = self.url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())?;
        Some(Article {
            url,
            title: collapse_whitespace(self.title.as_deref().unwrap_or_default()),
            description: self
                .description
                .map(|d| collapse_whitespace(&d))
                .filter(|d| !d.is_empty()),
            url_to_image: self.url_to_image.filter(|u| !u.trim().is_empty()),
            published_at: self.published_at.unwrap_or_default(),
            source: self.source.name.unwrap_or_default(),
            is_favourite: false,
            is_headline_cache: false,
        })
    }
}

/// Decode a successful (2xx) response body.
///
/// A body with `"status": "error"` is turned into [`NewsError::Api`] even
/// when the HTTP status was 200.
pub(crate) fn decode_page(body: &[u8]) -> Result<PageResponse, NewsError> {
    let response: ApiResponse = serde_json::from_slice(body)?;

    if response.status == ResponseStatus::Error {
        return Err(api_error(response.code, response.message));
    }

    let total = response.articles.len();
    let articles: Vec<Article> = response
        .articles
        .into_iter()
        .filter_map(ApiArticle::into_article)
        .collect();

    let skipped = total - articles.len();
    if skipped > 0 {
        tracing::warn!(skipped = skipped, "Articles without a URL skipped");
    }

    Ok(PageResponse {
        status: response.status,
        total_results: response.total_results,
        articles,
    })
}

/// Extract the API's own error message from a non-2xx body, if it sent one.
pub(crate) fn decode_error(body: &[u8]) -> Option<NewsError> {
    let response: ApiResponse = serde_json::from_slice(body).ok()?;
    (response.status == ResponseStatus::Error).then(|| api_error(response.code, response.message))
}

fn api_error(code: Option<String>, message: Option<String>) -> NewsError {
    NewsError::Api {
        code: code.unwrap_or_else(|| "unknown".to_string()),
        message: message.unwrap_or_else(|| "no message".to_string()),
    }
}
