//! newsdesk: news headlines and search with an offline cache.
//!
//! The library holds everything but the command line:
//!
//! - [`news`] - NewsAPI client behind the [`news::NewsSource`] trait
//! - [`storage`] - SQLite article store (favourites and headline cache)
//! - [`sync`] - the controller that paginates, merges and falls back offline
//! - [`content`] - article page fetching and body extraction
//! - [`connectivity`] - reachability monitors, subscriptions and the banner
//! - [`config`] - `config.toml` loading
//! - [`util`] - URL validation and text helpers

pub mod config;
pub mod connectivity;
pub mod content;
pub mod news;
pub mod storage;
pub mod sync;
pub mod util;
