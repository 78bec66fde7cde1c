use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use super::state::{FeedError, FeedKind, FeedState};
use crate::connectivity::ConnectivityMonitor;
use crate::content::{extract_main_text, ContentFetcher};
use crate::news::{NewsError, NewsSource, DEFAULT_PAGE_SIZE};
use crate::storage::{Article, Database};
use crate::util::MAX_SEARCH_QUERY_LENGTH;

/// Tunables for the controller.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Regions whose headlines come from a text search instead of the
    /// headlines endpoint (region code -> search term)
    pub region_redirects: HashMap<String, String>,
    /// Drop articles without a picture
    pub require_image: bool,
    /// Page size the news source was configured with
    pub page_size: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            region_redirects: HashMap::from([("in".to_string(), "India".to_string())]),
            require_image: true,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Keeps the headline and search feeds, the favourites set and the headline
/// cache in step.
///
/// Each feed's [`FeedState`] lives in a `watch` channel: operations publish
/// `Loading` first and the outcome after, and any number of observers can
/// follow along via [`subscribe_headlines`](Self::subscribe_headlines) and
/// [`subscribe_search`](Self::subscribe_search). State is only touched in
/// short synchronous sections, never across an await, so two concurrent
/// fetches of one feed race and the last write wins.
///
/// Remote failures never escape: headlines fall back to the local cache
/// silently, searches end in [`FeedStatus::Error`](super::FeedStatus::Error).
pub struct SyncController {
    source: Arc<dyn NewsSource>,
    db: Database,
    monitor: Arc<dyn ConnectivityMonitor>,
    fetcher: ContentFetcher,
    options: SyncOptions,
    headlines: watch::Sender<FeedState>,
    search: watch::Sender<FeedState>,
    favourites: watch::Sender<Vec<Article>>,
}

impl SyncController {
    /// Build a controller and load the current favourites from the store.
    pub async fn new(
        source: Arc<dyn NewsSource>,
        db: Database,
        monitor: Arc<dyn ConnectivityMonitor>,
        fetcher: ContentFetcher,
        options: SyncOptions,
    ) -> Result<Self> {
        let favourites = db.get_favourites().await?;
        tracing::debug!(favourites = favourites.len(), "Sync controller ready");

        Ok(Self {
            source,
            db,
            monitor,
            fetcher,
            options,
            headlines: watch::Sender::new(FeedState::new()),
            search: watch::Sender::new(FeedState::new()),
            favourites: watch::Sender::new(favourites),
        })
    }

    // ========================================================================
    // Headlines
    // ========================================================================

    /// Fetch the next page of headlines for `region`.
    ///
    /// Falls back to the cached headlines, flagged `offline`, when the
    /// network is unreachable or anything on the online path fails.
    pub async fn fetch_headlines(&self, region: &str) -> FeedState {
        let region = region.trim().to_ascii_lowercase();
        let mut page = 1;
        self.headlines.send_modify(|s| {
            s.begin_loading();
            page = s.current_page;
        });

        let status = self.monitor.current_status().await;
        if !status.is_reachable() {
            tracing::info!(status = %status, "Offline, serving cached headlines");
            return self.serve_cached_headlines().await;
        }

        let result = match self.options.region_redirects.get(&region) {
            Some(term) => {
                tracing::debug!(region = %region, term = %term, page = page, "Region redirected to search");
                self.source.search(term, page).await
            }
            None => self.source.top_headlines(&region, page).await,
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(region = %region, page = page, error = %e, "Headline fetch failed, serving cache");
                return self.serve_cached_headlines().await;
            }
        };

        let mut articles = self.filter_images(response.articles);
        if let Err(e) = self.cache_page(&mut articles, page).await {
            tracing::warn!(page = page, error = %e, "Failed to cache headlines, serving cache");
            return self.serve_cached_headlines().await;
        }

        tracing::info!(
            region = %region,
            page = page,
            articles = articles.len(),
            total = response.total_results,
            "Headlines updated"
        );
        self.headlines
            .send_modify(|s| s.merge_page(articles, response.total_results));
        self.headlines()
    }

    /// Start the headline feed over from page 1.
    pub async fn refresh_headlines(&self, region: &str) -> FeedState {
        self.headlines.send_modify(FeedState::reset);
        self.fetch_headlines(region).await
    }

    /// Mark the page as headline cache, sync favourite flags, and store it.
    async fn cache_page(&self, articles: &mut [Article], page: u32) -> Result<()> {
        let favourites = self.db.favourite_urls().await?;
        for article in articles.iter_mut() {
            article.is_headline_cache = true;
            article.is_favourite = favourites.contains(&article.url);
        }
        self.db.cache_headlines(articles, page <= 1).await?;
        Ok(())
    }

    async fn serve_cached_headlines(&self) -> FeedState {
        let cached = match self.db.get_headline_cache().await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read headline cache");
                Vec::new()
            }
        };
        tracing::debug!(count = cached.len(), "Serving cached headlines");
        self.headlines.send_modify(|s| s.serve_offline(cached));
        self.headlines()
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Fetch the next page of results for `query`.
    ///
    /// A query different from the previous one starts over at page 1; the
    /// same query appends the next page.
    pub async fn search_news(&self, query: &str) -> FeedState {
        let query = query.trim();
        if query.is_empty() {
            return self.fail_search(FeedError::EmptyQuery);
        }
        if query.chars().count() > MAX_SEARCH_QUERY_LENGTH {
            return self.fail_search(FeedError::QueryTooLong(MAX_SEARCH_QUERY_LENGTH));
        }

        let mut page = 1;
        self.search.send_modify(|s| {
            if s.last_query.as_deref() != Some(query) {
                s.reset();
                s.last_query = Some(query.to_string());
            }
            s.begin_loading();
            page = s.current_page;
        });

        let status = self.monitor.current_status().await;
        if !status.is_reachable() {
            tracing::info!(status = %status, "Offline, search not attempted");
            return self.fail_search(FeedError::NoConnectivity);
        }

        let response = match self.source.search(query, page).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(page = page, error = %e, "Search failed");
                return self.fail_search(FeedError::Remote(describe(&e)));
            }
        };

        let mut articles = self.filter_images(response.articles);
        match self.db.favourite_urls().await {
            Ok(favourites) => {
                for article in &mut articles {
                    article.is_favourite = favourites.contains(&article.url);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to read favourites for search results"),
        }

        tracing::info!(
            page = page,
            articles = articles.len(),
            total = response.total_results,
            "Search results updated"
        );
        self.search
            .send_modify(|s| s.merge_page(articles, response.total_results));
        self.search()
    }

    /// Re-run the last query from page 1.
    pub async fn refresh_search(&self) -> FeedState {
        let last_query = self.search.borrow().last_query.clone();
        let Some(query) = last_query else {
            return self.fail_search(FeedError::EmptyQuery);
        };
        self.search.send_modify(FeedState::reset);
        self.search_news(&query).await
    }

    fn fail_search(&self, error: FeedError) -> FeedState {
        self.search.send_modify(|s| s.fail(error));
        self.search()
    }

    // ========================================================================
    // Favourites
    // ========================================================================

    pub async fn add_favourite(&self, article: &Article) -> Result<()> {
        self.db.set_favourite(article, true).await?;
        tracing::info!(url = %article.url, "Added favourite");
        self.favourite_changed(&article.url, true).await
    }

    pub async fn remove_favourite(&self, article: &Article) -> Result<()> {
        self.db.set_favourite(article, false).await?;
        tracing::info!(url = %article.url, "Removed favourite");
        self.favourite_changed(&article.url, false).await
    }

    /// Flip the favourite flag, returns the new value.
    ///
    /// The store decides the current value, not the flag on `article`.
    pub async fn toggle_favourite(&self, article: &Article) -> Result<bool> {
        if self.db.is_favourite(&article.url).await? {
            self.remove_favourite(article).await?;
            Ok(false)
        } else {
            self.add_favourite(article).await?;
            Ok(true)
        }
    }

    /// Favourites in the order they were added
    pub async fn list_favourites(&self) -> Result<Vec<Article>> {
        self.db.get_favourites().await
    }

    /// The stored copy of an article (favourite or cached headline)
    pub async fn stored_article(&self, url: &str) -> Result<Option<Article>> {
        self.db.get_article(url).await
    }

    /// Live favourites list, republished after every change
    pub fn watch_favourites(&self) -> watch::Receiver<Vec<Article>> {
        self.favourites.subscribe()
    }

    async fn favourite_changed(&self, url: &str, favourite: bool) -> Result<()> {
        self.headlines
            .send_if_modified(|s| s.set_favourite_flag(url, favourite));
        self.search
            .send_if_modified(|s| s.set_favourite_flag(url, favourite));

        let favourites = self.db.get_favourites().await?;
        self.favourites.send_replace(favourites);
        Ok(())
    }

    // ========================================================================
    // Article Bodies
    // ========================================================================

    /// Readable text of the article at `url`, or `None` when the page
    /// could not be fetched or has too little text.
    pub async fn extract_article_body(&self, url: &str) -> Option<String> {
        let html = match self.fetcher.fetch(url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Article fetch failed");
                return None;
            }
        };

        match tokio::task::spawn_blocking(move || extract_main_text(&html)).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Article extraction task failed");
                None
            }
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn headlines(&self) -> FeedState {
        self.headlines.borrow().clone()
    }

    pub fn search(&self) -> FeedState {
        self.search.borrow().clone()
    }

    pub fn state(&self, kind: FeedKind) -> FeedState {
        match kind {
            FeedKind::Headlines => self.headlines(),
            FeedKind::Search => self.search(),
        }
    }

    pub fn subscribe_headlines(&self) -> watch::Receiver<FeedState> {
        self.headlines.subscribe()
    }

    pub fn subscribe_search(&self) -> watch::Receiver<FeedState> {
        self.search.subscribe()
    }

    /// Whether another page of `kind` can be fetched
    pub fn has_more(&self, kind: FeedKind) -> bool {
        let page_size = self.options.page_size;
        match kind {
            FeedKind::Headlines => self.headlines.borrow().has_more(page_size),
            FeedKind::Search => self.search.borrow().has_more(page_size),
        }
    }

    fn filter_images(&self, articles: Vec<Article>) -> Vec<Article> {
        if !self.options.require_image {
            return articles;
        }
        let total = articles.len();
        let kept: Vec<Article> = articles.into_iter().filter(Article::has_image).collect();
        if kept.len() < total {
            tracing::debug!(dropped = total - kept.len(), "Dropped articles without images");
        }
        kept
    }
}

/// Message for a failed search, transport failures phrased for humans.
fn describe(error: &NewsError) -> String {
    if error.is_connectivity() {
        "Unable to connect to the internet".to_string()
    } else {
        error.to_string()
    }
}
