use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another instance of newsdesk appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and SQLITE_CANTOPEN all mean another process owns the file.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// A news article as shown in the feeds and persisted in the local store.
///
/// Identity is the URL. `is_favourite` and `is_headline_cache` are the only
/// fields the application mutates; everything else comes from the news API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub url_to_image: Option<String>,
    /// RFC 3339 timestamp as delivered by the API (kept verbatim)
    pub published_at: String,
    pub source: String,
    pub is_favourite: bool,
    pub is_headline_cache: bool,
}

impl Article {
    /// Parsed publication time, if the API sent a valid RFC 3339 timestamp.
    pub fn published(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.published_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn has_image(&self) -> bool {
        self.url_to_image
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }
}

/// Internal row type for article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub url_to_image: Option<String>,
    pub published_at: String,
    pub source: String,
    pub is_favourite: bool,
    pub is_headline_cache: bool,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            url: self.url,
            title: self.title,
            description: self.description,
            url_to_image: self.url_to_image,
            published_at: self.published_at,
            source: self.source,
            is_favourite: self.is_favourite,
            is_headline_cache: self.is_headline_cache,
        }
    }
}
