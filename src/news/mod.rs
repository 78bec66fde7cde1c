//! Remote news API access.
//!
//! - [`client`] - the [`NewsSource`] trait and its NewsAPI v2 implementation
//!   with retry, timeout, and response size limits
//! - [`response`] - decoding of paged article responses and API error bodies
//!
//! # Example
//!
//! ```ignore
//! use newsdesk::news::{NewsApiClient, NewsSource};
//!
//! let client = NewsApiClient::new(http, "https://newsapi.org", api_key)?;
//! let page = client.top_headlines("us", 1).await?;
//! println!("{} of {} results", page.articles.len(), page.total_results);
//! ```

mod client;
mod response;

pub use client::{NewsApiClient, NewsError, NewsSource, DEFAULT_BASE_URL, DEFAULT_PAGE_SIZE};
pub use response::{PageResponse, ResponseStatus};
