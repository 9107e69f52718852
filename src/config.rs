//! Configuration file parser for ~/.config/curator/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown top-level keys are accepted but logged, since they are usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

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
/// All structs use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Relative paths resolve against the config directory.
    pub database: PathBuf,
    pub library: LibraryConfig,
    /// Curated ranking sources, in display order
    pub rankings: Vec<RankingSourceConfig>,
    pub score: ScoreConfig,
    pub feeds: FeedConfig,
    pub rating: RatingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("catalog.db"),
            library: LibraryConfig::default(),
            rankings: Vec::new(),
            score: ScoreConfig::default(),
            feeds: FeedConfig::default(),
            rating: RatingConfig::default(),
        }
    }
}

/// Media-library (Jellyfin/Emby) connection.
///
/// Custom Debug impl masks `api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Base URL of the media server, e.g. `http://nas.local:8096`
    pub url: String,
    pub api_key: Option<String>,
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8096".to_string(),
            api_key: None,
            page_size: 500,
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for LibraryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("page_size", &self.page_size)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl LibraryConfig {
    /// The API key wrapped so it cannot leak through logs
    pub fn secret_key(&self) -> Option<SecretString> {
        self.api_key.clone().map(SecretString::from)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One curated ranking file.
#[derive(Debug, Clone, Deserialize)]
pub struct RankingSourceConfig {
    pub label: String,
    pub path: PathBuf,
}

/// Which ranking labels feed the composite score.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    pub primary: String,
    pub secondary: String,
    /// Annual lists in priority order; the first one containing a code wins
    pub annual: Vec<String>,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            primary: "TOP250".to_string(),
            secondary: "TOP500".to_string(),
            annual: vec!["2025 TOP250".to_string(), "2024 TOP250".to_string()],
        }
    }
}

/// Syndication hub and per-performer feed polling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub hub_url: String,
    /// Path appended to `hub_url`; `{id}` is replaced by the performer's feed id
    pub route: String,
    /// Upstream domains handed to the hub, tried in order on timeouts
    pub domains: Vec<String>,
    /// Empty means the hub's default language
    pub language: String,
    pub request_delay_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            hub_url: "http://localhost:1200".to_string(),
            route: "/javbus/star/{id}".to_string(),
            domains: Vec::new(),
            language: String::new(),
            request_delay_ms: 2_000,
            max_retries: 3,
            retry_base_delay_ms: 5_000,
            timeout_secs: 30,
        }
    }
}

impl FeedConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Rating site scraping.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    pub base_url: String,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
    /// Wait after a block is `(retry + 1) * block_backoff_ms`
    pub block_backoff_ms: u64,
    /// Wait between whole-lookup rounds in the single-title command
    pub retry_wait_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://javdb.com".to_string(),
            min_delay_ms: 3_000,
            max_delay_ms: 5_000,
            max_retries: 3,
            block_backoff_ms: 5_000,
            retry_wait_ms: 10_000,
            timeout_secs: 15,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] =
        ["database", "library", "rankings", "score", "feeds", "rating"];

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
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            rankings = config.rankings.len(),
            domains = config.feeds.domains.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Resolve relative database and ranking paths against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.database.is_relative() {
            self.database = base.join(&self.database);
        }
        for source in &mut self.rankings {
            if source.path.is_relative() {
                source.path = base.join(&source.path);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
