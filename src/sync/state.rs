use thiserror::Error;

use crate::storage::Article;

/// Which of the two paginated feeds a state belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Headlines,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// User-facing reason a feed is in the error state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("No internet connection")]
    NoConnectivity,
    /// Remote failure, message passed through
    #[error("{0}")]
    Remote(String),
    #[error("Search query is empty")]
    EmptyQuery,
    #[error("Search query is too long (max {0} characters)")]
    QueryTooLong(usize),
}

/// Accumulated result of a paginated feed.
///
/// `current_page` is the next page to request; it starts at 1 and only
/// moves forward after a page has been merged.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedState {
    pub status: FeedStatus,
    /// Merged results in arrival order
    pub articles: Vec<Article>,
    pub current_page: u32,
    /// Query the accumulated results belong to (search only)
    pub last_query: Option<String>,
    pub error: Option<FeedError>,
    /// Total matches reported by the last successful page
    pub total_results: u64,
    /// Served from the local headline cache instead of the network
    pub offline: bool,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            status: FeedStatus::Idle,
            articles: Vec::new(),
            current_page: 1,
            last_query: None,
            error: None,
            total_results: 0,
            offline: false,
        }
    }
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.status == FeedStatus::Loading
    }

    pub(crate) fn begin_loading(&mut self) {
        self.status = FeedStatus::Loading;
        self.error = None;
    }

    /// Drop accumulated results and start again from page 1.
    pub(crate) fn reset(&mut self) {
        self.articles.clear();
        self.current_page = 1;
        self.total_results = 0;
        self.offline = false;
    }

    /// Merge one fetched page: page 1 replaces, later pages append.
    ///
    /// After an offline fallback the articles are the cached pages
    /// `1..current_page`, so the next page still appends.
    pub(crate) fn merge_page(&mut self, articles: Vec<Article>, total_results: u64) {
        if self.current_page <= 1 {
            self.articles = articles;
        } else {
            self.articles.extend(articles);
        }
        self.current_page = self.current_page.saturating_add(1);
        self.total_results = total_results;
        self.offline = false;
        self.status = FeedStatus::Success;
        self.error = None;
    }

    /// Publish cached articles without touching pagination.
    pub(crate) fn serve_offline(&mut self, cached: Vec<Article>) {
        self.articles = cached;
        self.offline = true;
        self.status = FeedStatus::Success;
        self.error = None;
    }

    pub(crate) fn fail(&mut self, error: FeedError) {
        self.status = FeedStatus::Error;
        self.error = Some(error);
    }

    /// Whether another page can be requested.
    ///
    /// Offline results are a single cached snapshot and never paginate.
    pub fn has_more(&self, page_size: u32) -> bool {
        if self.offline {
            return false;
        }
        let fetched = u64::from(self.current_page.saturating_sub(1)) * u64::from(page_size);
        fetched < self.total_results
    }

    /// Update the favourite flag on every copy of `url`. Returns whether
    /// anything changed.
    pub(crate) fn set_favourite_flag(&mut self, url: &str, favourite: bool) -> bool {
        let mut changed = false;
        for article in self.articles.iter_mut().filter(|a| a.url == url) {
            if article.is_favourite != favourite {
                article.is_favourite = favourite;
                changed = true;
            }
        }
        changed
    }
}
