//! Headline and search synchronization.
//!
//! [`SyncController`] fetches pages from a [`NewsSource`](crate::news::NewsSource),
//! merges them into per-feed [`FeedState`] records, keeps the local headline
//! cache and favourite flags in step with the store, and falls back to the
//! cache when the network is unavailable.
//!
//! # Feed lifecycle
//!
//! ```text
//! Idle -> Loading -> Success | Error
//!            ^            |
//!            +------------+   (next fetch, refresh, or new query)
//! ```

mod controller;
mod state;

pub use controller::{SyncController, SyncOptions};
pub use state::{FeedError, FeedKind, FeedState, FeedStatus};

#[cfg(test)]
mod tests;
