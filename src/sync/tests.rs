use super::*;
use crate::connectivity::{ManualMonitor, Status};
use crate::content::ContentFetcher;
use crate::news::{NewsError, NewsSource, PageResponse, ResponseStatus};
use crate::storage::{Article, Database};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Headlines(String, u32),
    Search(String, u32),
}

/// Scripted news source: answers calls from a queue, records what was asked.
#[derive(Default)]
struct FakeSource {
    responses: Mutex<VecDeque<Result<PageResponse, NewsError>>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeSource {
    fn push_page(&self, articles: Vec<Article>, total_results: u64) {
        self.responses.lock().unwrap().push_back(Ok(PageResponse {
            status: ResponseStatus::Ok,
            total_results,
            articles,
        }));
    }

    fn push_error(&self, error: NewsError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self) -> Result<PageResponse, NewsError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(NewsError::HttpStatus(599)))
    }
}

#[async_trait]
impl NewsSource for FakeSource {
    async fn top_headlines(&self, country: &str, page: u32) -> Result<PageResponse, NewsError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Headlines(country.to_string(), page));
        self.next()
    }

    async fn search(&self, query: &str, page: u32) -> Result<PageResponse, NewsError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Search(query.to_string(), page));
        self.next()
    }
}

struct Harness {
    controller: SyncController,
    source: Arc<FakeSource>,
    monitor: Arc<ManualMonitor>,
    db: Database,
}

async fn harness(status: Status) -> Harness {
    let source = Arc::new(FakeSource::default());
    let monitor = Arc::new(ManualMonitor::new(status));
    let db = Database::open(":memory:").await.unwrap();
    let fetcher = ContentFetcher::new(reqwest::Client::new())
        .allow_private_hosts(true)
        .with_retry_delay(Duration::from_millis(1));
    let controller = SyncController::new(
        source.clone(),
        db.clone(),
        monitor.clone(),
        fetcher,
        SyncOptions::default(),
    )
    .await
    .unwrap();

    Harness {
        controller,
        source,
        monitor,
        db,
    }
}

fn article(url: &str) -> Article {
    Article {
        url: format!("https://news.example.com/{url}"),
        title: format!("Story {url}"),
        description: Some("Summary".to_string()),
        url_to_image: Some(format!("https://img.example.com/{url}.jpg")),
        published_at: "2024-03-01T12:00:00Z".to_string(),
        source: "Example".to_string(),
        is_favourite: false,
        is_headline_cache: false,
    }
}

fn imageless(url: &str) -> Article {
    Article {
        url_to_image: None,
        ..article(url)
    }
}

fn urls(articles: &[Article]) -> Vec<String> {
    articles
        .iter()
        .map(|a| a.url.trim_start_matches("https://news.example.com/").to_string())
        .collect()
}

// ============================================================================
// Headlines
// ============================================================================

#[tokio::test]
async fn test_first_page_is_filtered_results() {
    let h = harness(Status::Available).await;
    h.source.push_page(
        vec![
            article("a"),
            imageless("b"),
            article("c"),
            imageless("d"),
            article("e"),
        ],
        5,
    );

    let state = h.controller.fetch_headlines("us").await;

    assert_eq!(state.status, FeedStatus::Success);
    assert_eq!(urls(&state.articles), vec!["a", "c", "e"]);
    assert_eq!(state.current_page, 2);
    assert!(!state.offline);
    assert!(state.articles.iter().all(|a| a.is_headline_cache));
    assert_eq!(h.source.calls(), vec![Call::Headlines("us".into(), 1)]);

    let cached = h.db.get_headline_cache().await.unwrap();
    assert_eq!(urls(&cached), vec!["a", "c", "e"]);
}

#[tokio::test]
async fn test_next_page_appends_and_advances() {
    let h = harness(Status::Available).await;
    h.source.push_page(vec![article("a"), article("b")], 4);
    h.source.push_page(vec![article("b"), article("c")], 4);

    h.controller.fetch_headlines("us").await;
    let state = h.controller.fetch_headlines("us").await;

    assert_eq!(urls(&state.articles), vec!["a", "b", "b", "c"]);
    assert_eq!(state.current_page, 3);
    assert_eq!(
        h.source.calls(),
        vec![
            Call::Headlines("us".into(), 1),
            Call::Headlines("us".into(), 2)
        ]
    );

    // The cache holds every page since the last page 1, without duplicates
    let cached = h.db.get_headline_cache().await.unwrap();
    assert_eq!(urls(&cached), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_page_one_replaces_previous_cache() {
    let h = harness(Status::Available).await;
    h.source.push_page(vec![article("old")], 1);
    h.source.push_page(vec![article("new")], 1);

    h.controller.fetch_headlines("us").await;
    let state = h.controller.refresh_headlines("us").await;

    assert_eq!(urls(&state.articles), vec!["new"]);
    assert_eq!(state.current_page, 2);
    let cached = h.db.get_headline_cache().await.unwrap();
    assert_eq!(urls(&cached), vec!["new"]);
    assert_eq!(h.db.get_article(&article("old").url).await.unwrap(), None);
}

#[tokio::test]
async fn test_unreachable_serves_cache_without_network() {
    let h = harness(Status::Unavailable).await;
    let mut cached = vec![article("x"), article("y")];
    for a in &mut cached {
        a.is_headline_cache = true;
    }
    h.db.cache_headlines(&cached, true).await.unwrap();

    let state = h.controller.fetch_headlines("us").await;

    assert_eq!(state.status, FeedStatus::Success);
    assert!(state.offline);
    assert_eq!(state.error, None);
    assert_eq!(urls(&state.articles), vec!["x", "y"]);
    assert_eq!(state.current_page, 1);
    assert!(h.source.calls().is_empty());
    assert!(!h.controller.has_more(FeedKind::Headlines));
}

#[tokio::test]
async fn test_lost_serves_cache_losing_does_not() {
    let h = harness(Status::Lost).await;
    let state = h.controller.fetch_headlines("us").await;
    assert!(state.offline);
    assert!(state.articles.is_empty());
    assert_eq!(state.status, FeedStatus::Success);

    h.monitor.set(Status::Losing);
    h.source.push_page(vec![article("a")], 1);
    let state = h.controller.fetch_headlines("us").await;
    assert!(!state.offline);
    assert_eq!(urls(&state.articles), vec!["a"]);
}

#[tokio::test]
async fn test_remote_failure_falls_back_silently() {
    let h = harness(Status::Available).await;
    h.source.push_page(vec![article("a"), article("b")], 10);
    h.controller.fetch_headlines("us").await;

    h.source.push_error(NewsError::HttpStatus(500));
    let state = h.controller.fetch_headlines("us").await;

    assert_eq!(state.status, FeedStatus::Success);
    assert_eq!(state.error, None);
    assert!(state.offline);
    assert_eq!(urls(&state.articles), vec!["a", "b"]);
    // Pagination untouched, so the next online fetch asks for page 2 again
    assert_eq!(state.current_page, 2);

    h.source.push_page(vec![article("c")], 10);
    let state = h.controller.fetch_headlines("us").await;
    assert!(!state.offline);
    assert_eq!(urls(&state.articles), vec!["a", "b", "c"]);
    assert_eq!(
        h.source.calls().last(),
        Some(&Call::Headlines("us".into(), 2))
    );
}

#[tokio::test]
async fn test_api_error_status_falls_back() {
    let h = harness(Status::Available).await;
    h.source.push_error(NewsError::Api {
        code: "apiKeyInvalid".into(),
        message: "bad key".into(),
    });

    let state = h.controller.fetch_headlines("us").await;
    assert_eq!(state.status, FeedStatus::Success);
    assert!(state.offline);
}

#[tokio::test]
async fn test_region_redirect_searches_into_headlines() {
    let h = harness(Status::Available).await;
    h.source.push_page(vec![article("delhi")], 1);

    let state = h.controller.fetch_headlines("IN").await;

    assert_eq!(h.source.calls(), vec![Call::Search("India".into(), 1)]);
    assert_eq!(urls(&state.articles), vec!["delhi"]);
    assert_eq!(h.controller.headlines(), state);
    assert_eq!(h.controller.search().status, FeedStatus::Idle);
}

#[tokio::test]
async fn test_headlines_pick_up_stored_favourites() {
    let h = harness(Status::Available).await;
    h.db.set_favourite(&article("b"), true).await.unwrap();
    h.source.push_page(vec![article("a"), article("b")], 2);

    let state = h.controller.fetch_headlines("us").await;

    let flags: Vec<bool> = state.articles.iter().map(|a| a.is_favourite).collect();
    assert_eq!(flags, vec![false, true]);
    // Still a favourite in the store after being cached
    assert!(h.db.is_favourite(&article("b").url).await.unwrap());
}

#[tokio::test]
async fn test_has_more_headlines() {
    let h = harness(Status::Available).await;
    h.source.push_page(vec![article("a")], 25);
    h.source.push_page(vec![article("b")], 25);

    h.controller.fetch_headlines("us").await;
    assert!(h.controller.has_more(FeedKind::Headlines));
    h.controller.fetch_headlines("us").await;
    assert!(!h.controller.has_more(FeedKind::Headlines));
}

#[tokio::test]
async fn test_subscribers_see_final_state() {
    let h = harness(Status::Available).await;
    let mut rx = h.controller.subscribe_headlines();
    assert_eq!(rx.borrow_and_update().status, FeedStatus::Idle);

    h.source.push_page(vec![article("a")], 1);
    h.controller.fetch_headlines("us").await;

    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().status, FeedStatus::Success);
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn test_new_query_resets_results() {
    let h = harness(Status::Available).await;
    h.source.push_page(vec![article("c1"), article("c2")], 40);
    h.source.push_page(vec![article("c3")], 40);
    h.source.push_page(vec![article("o1")], 1);

    h.controller.search_news("climate").await;
    let state = h.controller.search_news("climate").await;
    assert_eq!(urls(&state.articles), vec!["c1", "c2", "c3"]);
    assert_eq!(state.current_page, 3);

    let state = h.controller.search_news("ocean").await;
    assert_eq!(urls(&state.articles), vec!["o1"]);
    assert_eq!(state.current_page, 2);
    assert_eq!(state.last_query.as_deref(), Some("ocean"));
    assert_eq!(
        h.source.calls(),
        vec![
            Call::Search("climate".into(), 1),
            Call::Search("climate".into(), 2),
            Call::Search("ocean".into(), 1),
        ]
    );
}

#[tokio::test]
async fn test_search_drops_imageless_and_syncs_favourites() {
    let h = harness(Status::Available).await;
    h.db.set_favourite(&article("fav"), true).await.unwrap();
    h.source
        .push_page(vec![article("fav"), imageless("bare"), article("plain")], 3);

    let state = h.controller.search_news("  rust  ").await;

    assert_eq!(urls(&state.articles), vec!["fav", "plain"]);
    assert!(state.articles[0].is_favourite);
    assert!(!state.articles[1].is_favourite);
    assert_eq!(state.last_query.as_deref(), Some("rust"));
    // Search results are not written to the store
    assert_eq!(h.db.get_article(&article("plain").url).await.unwrap(), None);
}

#[tokio::test]
async fn test_search_offline_is_error() {
    let h = harness(Status::Unavailable).await;
    let state = h.controller.search_news("climate").await;

    assert_eq!(state.status, FeedStatus::Error);
    assert_eq!(state.error, Some(FeedError::NoConnectivity));
    assert!(h.source.calls().is_empty());
}

#[tokio::test]
async fn test_search_remote_failure_is_error() {
    let h = harness(Status::Available).await;
    h.source.push_error(NewsError::Api {
        code: "rateLimited".into(),
        message: "Too many requests".into(),
    });

    let state = h.controller.search_news("climate").await;

    assert_eq!(state.status, FeedStatus::Error);
    assert_eq!(
        state.error,
        Some(FeedError::Remote(
            "News API error (rateLimited): Too many requests".into()
        ))
    );
    assert_eq!(state.current_page, 1);
}

#[tokio::test]
async fn test_search_timeout_message() {
    let h = harness(Status::Available).await;
    h.source.push_error(NewsError::Timeout);

    let state = h.controller.search_news("climate").await;
    assert_eq!(
        state.error,
        Some(FeedError::Remote("Unable to connect to the internet".into()))
    );
}

#[tokio::test]
async fn test_blank_and_oversized_queries_rejected() {
    let h = harness(Status::Available).await;

    let state = h.controller.search_news("   ").await;
    assert_eq!(state.status, FeedStatus::Error);
    assert_eq!(state.error, Some(FeedError::EmptyQuery));

    let long = "q".repeat(crate::util::MAX_SEARCH_QUERY_LENGTH + 1);
    let state = h.controller.search_news(&long).await;
    assert!(matches!(state.error, Some(FeedError::QueryTooLong(_))));

    assert!(h.source.calls().is_empty());
}

#[tokio::test]
async fn test_refresh_search_reruns_from_page_one() {
    let h = harness(Status::Available).await;
    h.source.push_page(vec![article("a")], 30);
    h.source.push_page(vec![article("b")], 30);
    h.source.push_page(vec![article("fresh")], 30);

    h.controller.search_news("space").await;
    h.controller.search_news("space").await;
    let state = h.controller.refresh_search().await;

    assert_eq!(urls(&state.articles), vec!["fresh"]);
    assert_eq!(state.current_page, 2);
    assert_eq!(
        h.source.calls().last(),
        Some(&Call::Search("space".into(), 1))
    );
}

#[tokio::test]
async fn test_refresh_search_without_query() {
    let h = harness(Status::Available).await;
    let state = h.controller.refresh_search().await;
    assert_eq!(state.error, Some(FeedError::EmptyQuery));
}

#[tokio::test]
async fn test_failed_search_retry_requests_same_page() {
    let h = harness(Status::Available).await;
    h.source.push_page(vec![article("a")], 30);
    h.source.push_error(NewsError::HttpStatus(502));
    h.source.push_page(vec![article("b")], 30);

    h.controller.search_news("mars").await;
    h.controller.search_news("mars").await;
    let state = h.controller.search_news("mars").await;

    assert_eq!(urls(&state.articles), vec!["a", "b"]);
    assert_eq!(
        h.source.calls(),
        vec![
            Call::Search("mars".into(), 1),
            Call::Search("mars".into(), 2),
            Call::Search("mars".into(), 2),
        ]
    );
}

// ============================================================================
// Favourites
// ============================================================================

#[tokio::test]
async fn test_toggle_twice_restores_flag() {
    let h = harness(Status::Available).await;
    let a = article("a");

    assert!(h.controller.toggle_favourite(&a).await.unwrap());
    assert!(h.db.is_favourite(&a.url).await.unwrap());

    assert!(!h.controller.toggle_favourite(&a).await.unwrap());
    assert!(!h.db.is_favourite(&a.url).await.unwrap());
    assert_eq!(h.db.get_article(&a.url).await.unwrap(), None);
}

#[tokio::test]
async fn test_add_remove_idempotent() {
    let h = harness(Status::Available).await;
    let a = article("a");

    h.controller.add_favourite(&a).await.unwrap();
    h.controller.add_favourite(&a).await.unwrap();
    assert_eq!(h.controller.list_favourites().await.unwrap().len(), 1);

    h.controller.remove_favourite(&a).await.unwrap();
    h.controller.remove_favourite(&a).await.unwrap();
    assert!(h.controller.list_favourites().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_favourites_listed_in_insertion_order() {
    let h = harness(Status::Available).await;
    for name in ["c", "a", "b"] {
        h.controller.add_favourite(&article(name)).await.unwrap();
    }
    let favourites = h.controller.list_favourites().await.unwrap();
    assert_eq!(urls(&favourites), vec!["c", "a", "b"]);
    assert!(favourites.iter().all(|a| a.is_favourite));
}

#[tokio::test]
async fn test_favourite_updates_feed_flags_and_watchers() {
    let h = harness(Status::Available).await;
    h.source.push_page(vec![article("a"), article("b")], 2);
    h.controller.fetch_headlines("us").await;
    h.source.push_page(vec![article("a")], 1);
    h.controller.search_news("a").await;

    let mut favourites = h.controller.watch_favourites();
    assert!(favourites.borrow_and_update().is_empty());

    h.controller.add_favourite(&article("a")).await.unwrap();

    assert!(h.controller.headlines().articles[0].is_favourite);
    assert!(!h.controller.headlines().articles[1].is_favourite);
    assert!(h.controller.search().articles[0].is_favourite);
    assert!(favourites.has_changed().unwrap());
    assert_eq!(urls(&favourites.borrow_and_update()), vec!["a"]);

    h.controller.remove_favourite(&article("a")).await.unwrap();
    assert!(!h.controller.headlines().articles[0].is_favourite);
    assert!(favourites.borrow_and_update().is_empty());
}

#[tokio::test]
async fn test_unfavouring_cached_headline_keeps_it_cached() {
    let h = harness(Status::Available).await;
    h.source.push_page(vec![article("a")], 1);
    h.controller.fetch_headlines("us").await;

    h.controller.add_favourite(&article("a")).await.unwrap();
    h.controller.remove_favourite(&article("a")).await.unwrap();

    let stored = h.db.get_article(&article("a").url).await.unwrap().unwrap();
    assert!(!stored.is_favourite);
    assert!(stored.is_headline_cache);
}

#[tokio::test]
async fn test_favourite_survives_cache_replacement() {
    let h = harness(Status::Available).await;
    h.source.push_page(vec![article("a")], 1);
    h.controller.fetch_headlines("us").await;
    h.controller.add_favourite(&article("a")).await.unwrap();

    h.source.push_page(vec![article("z")], 1);
    h.controller.refresh_headlines("us").await;

    let favourites = h.controller.list_favourites().await.unwrap();
    assert_eq!(urls(&favourites), vec!["a"]);
    assert!(!favourites[0].is_headline_cache);
}

#[tokio::test]
async fn test_existing_favourites_loaded_on_start() {
    let db = Database::open(":memory:").await.unwrap();
    db.set_favourite(&article("saved"), true).await.unwrap();

    let controller = SyncController::new(
        Arc::new(FakeSource::default()),
        db,
        Arc::new(ManualMonitor::new(Status::Available)),
        ContentFetcher::new(reqwest::Client::new()),
        SyncOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(urls(&controller.watch_favourites().borrow()), vec!["saved"]);
}

// ============================================================================
// Article Bodies
// ============================================================================

mod extraction {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(server: &MockServer, route: &str, status: u16, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_article_paragraphs_returned() {
        let server = MockServer::start().await;
        let text = "Lorem ipsum dolor sit amet. ".repeat(22);
        let body = text.trim().to_string();
        assert_eq!(body.chars().count(), 615);
        serve(
            &server,
            "/long",
            200,
            format!("<html><body><nav><p>Home</p></nav><article><p>{body}</p></article></body></html>"),
        )
        .await;

        let h = harness(Status::Available).await;
        let extracted = h
            .controller
            .extract_article_body(&format!("{}/long", server.uri()))
            .await;
        assert_eq!(extracted, Some(body));
    }

    #[tokio::test]
    async fn test_fallback_paragraphs_returned() {
        let server = MockServer::start().await;
        let body = "A short wire report with only sixty characters of content!";
        assert!(body.chars().count() >= 50);
        serve(
            &server,
            "/short",
            200,
            format!("<html><body><div><p>{body}</p></div></body></html>"),
        )
        .await;

        let h = harness(Status::Available).await;
        let extracted = h
            .controller
            .extract_article_body(&format!("{}/short", server.uri()))
            .await;
        assert_eq!(extracted.as_deref(), Some(body));
    }

    #[tokio::test]
    async fn test_too_little_text_is_none() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/empty",
            200,
            "<html><body><p>Subscribe</p></body></html>".to_string(),
        )
        .await;

        let h = harness(Status::Available).await;
        let extracted = h
            .controller
            .extract_article_body(&format!("{}/empty", server.uri()))
            .await;
        assert_eq!(extracted, None);
    }

    #[tokio::test]
    async fn test_fetch_error_is_none() {
        let server = MockServer::start().await;
        serve(&server, "/gone", 404, String::new()).await;

        let h = harness(Status::Available).await;
        let extracted = h
            .controller
            .extract_article_body(&format!("{}/gone", server.uri()))
            .await;
        assert_eq!(extracted, None);
    }
}
