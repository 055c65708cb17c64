//! Configuration file parser for refeed.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as potential typos.
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified; missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind: String,

    /// User-agent sent with every request. Crawl responsibly: identify
    /// yourself to the servers whose whole archive you are about to walk.
    pub user_agent: String,

    /// Directory holding the on-disk response cache.
    pub cache_dir: PathBuf,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Minimum spacing between network requests in milliseconds.
    /// 0 disables the delay. Cache hits are never delayed.
    pub download_delay_ms: u64,

    /// How many fetches the self/current resolution loop may take before
    /// giving up on a feed.
    pub max_redirections: usize,

    /// How long one poll for an in-progress history waits before handing
    /// back a progress snapshot, in milliseconds.
    pub poll_wait_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            user_agent: "refeed/0.1 experimental RSS history fetcher".to_string(),
            cache_dir: PathBuf::from("httpcache"),
            request_timeout_secs: 30,
            download_delay_ms: 1_000,
            max_redirections: 10,
            poll_wait_ms: 1_000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "bind",
                "user_agent",
                "cache_dir",
                "request_timeout_secs",
                "download_delay_ms",
                "max_redirections",
                "poll_wait_ms",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), bind = %config.bind, "Loaded configuration");
        Ok(config)
    }
}
