//! Configuration file parser for ~/.config/newsdesk/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, but we log a warning so typos are
//! visible.
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::connectivity::{DEFAULT_PROBE_ADDRESS, DEFAULT_PROBE_INTERVAL};
use crate::news::{DEFAULT_BASE_URL, DEFAULT_PAGE_SIZE};
use crate::sync::SyncOptions;

/// Environment variable that overrides `api_key`
pub const API_KEY_ENV: &str = "NEWS_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The custom `Debug` impl masks `api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// NewsAPI key. `NEWS_API_KEY` takes precedence.
    pub api_key: Option<String>,

    /// API root; HTTPS unless pointing at localhost.
    pub base_url: String,

    /// Default two-letter country code for headlines.
    pub region: String,

    /// Articles per page, clamped to 1..=100.
    pub page_size: u32,

    pub request_timeout_secs: u64,

    /// `host:port` the connectivity probe connects to.
    pub probe_address: String,

    pub probe_interval_secs: u64,

    pub headlines: HeadlinesConfig,
}

/// The `[headlines]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeadlinesConfig {
    /// Region code -> search term used instead of the headlines endpoint.
    pub redirects: HashMap<String, String>,

    /// Drop articles that have no image.
    pub require_image: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            region: "us".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: 30,
            probe_address: DEFAULT_PROBE_ADDRESS.to_string(),
            probe_interval_secs: DEFAULT_PROBE_INTERVAL.as_secs(),
            headlines: HeadlinesConfig::default(),
        }
    }
}

impl Default for HeadlinesConfig {
    fn default() -> Self {
        let defaults = SyncOptions::default();
        Self {
            redirects: defaults.region_redirects,
            require_image: defaults.require_image,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("region", &self.region)
            .field("page_size", &self.page_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("probe_address", &self.probe_address)
            .field("probe_interval_secs", &self.probe_interval_secs)
            .field("headlines", &self.headlines)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "api_key",
        "base_url",
        "region",
        "page_size",
        "request_timeout_secs",
        "probe_address",
        "probe_interval_secs",
        "headlines",
    ];

    const KNOWN_HEADLINE_KEYS: [&'static str; 2] = ["redirects", "require_image"];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(region = %config.region, page_size = config.page_size, "Loaded configuration");
        Ok(config)
    }

    /// The API key to use: `NEWS_API_KEY` if set and non-blank, else the
    /// config file value.
    pub fn api_key(&self) -> Option<SecretString> {
        self.api_key_with_env(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_with_env(&self, env_value: Option<String>) -> Option<SecretString> {
        env_value
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
            .map(|k| SecretString::from(k.trim().to_string()))
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.clamp(1, 100)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    /// Controller options derived from this config.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            region_redirects: self
                .headlines
                .redirects
                .iter()
                .map(|(region, term)| (region.trim().to_ascii_lowercase(), term.clone()))
                .collect(),
            require_image: self.headlines.require_image,
            page_size: self.page_size(),
        }
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    for key in raw.keys() {
        if !Config::KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
    if let Some(toml::Value::Table(headlines)) = raw.get("headlines") {
        for key in headlines.keys() {
            if !Config::KNOWN_HEADLINE_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Unknown key in [headlines], ignoring");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
