//! Configuration file parser for `inkfeed.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning for each one
//! since they are usually typos.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::default_placeholders;
use crate::pipeline::PipelineConfig;
use crate::summary::BatchConfig;

/// Environment variable that overrides `openai_api_key`.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("No summarization API key configured (set {API_KEY_ENV} or openai_api_key)")]
    MissingCredential,
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// SEC-015: Custom Debug impl masks `openai_api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address for the HTTP gateway.
    pub bind: String,

    /// How long a cached category stays fresh.
    pub cache_ttl_secs: u64,

    /// Budget for one feed fetch, retries included.
    pub fetch_timeout_secs: u64,

    pub max_concurrent_fetches: usize,

    /// Entries kept from each feed document.
    pub max_items_per_feed: usize,

    /// Articles kept after ranking.
    pub max_articles: usize,

    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub summary_timeout_secs: u64,

    /// Memoised summaries; 0 disables the memo.
    pub summary_cache_capacity: usize,

    /// Upper bound on `POST /feed/custom` endpoint lists.
    pub max_custom_endpoints: usize,

    /// Refresh every category in the background at startup.
    pub prewarm: bool,

    /// Summarization API key. The env var takes precedence.
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,

    /// Stand-in images for articles without one.
    pub placeholder_images: Vec<String>,

    /// OPML file to build the registry from. Takes precedence over `categories`.
    pub opml_path: Option<PathBuf>,

    /// Allowed CORS origins; empty allows any.
    pub cors_origins: Vec<String>,

    /// Category name to feed URLs. Empty means the built-in catalogue.
    pub categories: BTreeMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            cache_ttl_secs: 30,
            fetch_timeout_secs: 15,
            max_concurrent_fetches: 16,
            max_items_per_feed: 8,
            max_articles: 50,
            batch_size: 3,
            batch_pause_ms: 300,
            summary_timeout_secs: 20,
            summary_cache_capacity: 512,
            max_custom_endpoints: 10,
            prewarm: true,
            openai_api_key: None,
            openai_base_url: None,
            openai_model: None,
            placeholder_images: default_placeholders(),
            opml_path: None,
            cors_origins: Vec::new(),
            categories: BTreeMap::new(),
        }
    }
}

/// SEC-015: Mask openai_api_key in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .field("max_items_per_feed", &self.max_items_per_feed)
            .field("max_articles", &self.max_articles)
            .field("batch_size", &self.batch_size)
            .field("batch_pause_ms", &self.batch_pause_ms)
            .field("summary_timeout_secs", &self.summary_timeout_secs)
            .field("summary_cache_capacity", &self.summary_cache_capacity)
            .field("max_custom_endpoints", &self.max_custom_endpoints)
            .field("prewarm", &self.prewarm)
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_model", &self.openai_model)
            .field("placeholder_images", &self.placeholder_images.len())
            .field("opml_path", &self.opml_path)
            .field("cors_origins", &self.cors_origins)
            .field("categories", &self.categories.keys().collect::<Vec<_>>())
            .finish()
    }
}

const KNOWN_KEYS: &[&str] = &[
    "bind",
    "cache_ttl_secs",
    "fetch_timeout_secs",
    "max_concurrent_fetches",
    "max_items_per_feed",
    "max_articles",
    "batch_size",
    "batch_pause_ms",
    "summary_timeout_secs",
    "summary_cache_capacity",
    "max_custom_endpoints",
    "prewarm",
    "openai_api_key",
    "openai_base_url",
    "openai_model",
    "placeholder_images",
    "opml_path",
    "cors_origins",
    "categories",
];

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

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

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            bind = %config.bind,
            categories = config.categories.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse TOML text. Blank input yields the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        Ok(toml::from_str(content)?)
    }

    /// Resolve the summarization API key: env var first, then the file.
    /// Blank values count as absent.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.api_key_with(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_with(&self, env_value: Option<String>) -> Result<String, ConfigError> {
        env_value
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                self.openai_api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
            })
            .ok_or(ConfigError::MissingCredential)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Zero limits are raised to 1 so a typo cannot stall the pipeline.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs.max(1)),
            max_concurrent_fetches: self.max_concurrent_fetches.max(1),
            max_articles: self.max_articles.max(1),
            placeholders: self.placeholder_images.clone(),
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size.max(1),
            pause: Duration::from_millis(self.batch_pause_ms),
            call_timeout: Duration::from_secs(self.summary_timeout_secs.max(1)),
            memo_capacity: self.summary_cache_capacity,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("inkfeed_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("inkfeed.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.cache_ttl_secs, 30);
        assert_eq!(config.max_items_per_feed, 8);
        assert_eq!(config.max_articles, 50);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.batch_pause_ms, 300);
        assert_eq!(config.placeholder_images.len(), 3);
        assert!(config.prewarm);
        assert!(config.categories.is_empty());
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/inkfeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.cache_ttl_secs, 30);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.bind, "127.0.0.1:8080");
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let path = write_config(
            "full",
            r#"
bind = "0.0.0.0:9000"
cache_ttl_secs = 60
batch_size = 5
prewarm = false
openai_model = "gpt-4o"
cors_origins = ["https://news.example.com"]

[categories]
tech = ["https://example.com/tech.xml"]
world = ["https://example.com/a.xml", "https://example.com/b.xml"]
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.batch_size, 5);
        assert!(!config.prewarm);
        assert_eq!(config.openai_model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.cors_origins, vec!["https://news.example.com"]);
        assert_eq!(config.categories["world"].len(), 2);
        // untouched keys keep defaults
        assert_eq!(config.max_articles, 50);

        cleanup(&path);
    }

    #[test]
    fn test_config_categories_register_in_name_order() {
        let config = Config::parse(
            r#"
[categories]
zeta = ["https://z.example.com/feed"]
alpha = ["https://a.example.com/feed"]
"#,
        )
        .unwrap();

        let registry = crate::feed::Registry::from_categories(&config.categories);
        assert_eq!(registry.categories().collect::<Vec<_>>(), vec!["alpha", "zeta"]);
        let all: Vec<&str> = registry
            .resolve("all")
            .unwrap()
            .iter()
            .map(|e| e.url.as_str())
            .collect();
        assert_eq!(all, vec!["https://a.example.com/feed", "https://z.example.com/feed"]);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::parse("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::parse("cache_ttl_secs = \"thirty\"\n").is_err());
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::parse("theme = \"dark\"\nbatch_size = 4\n").unwrap();
        assert_eq!(config.batch_size, 4);
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        cleanup(&path);
    }

    #[test]
    fn test_env_key_takes_precedence() {
        let config = Config {
            openai_api_key: Some("from-file".to_string()),
            ..Config::default()
        };
        assert_eq!(config.api_key_with(Some("from-env".to_string())).unwrap(), "from-env");
        assert_eq!(config.api_key_with(None).unwrap(), "from-file");
        assert_eq!(config.api_key_with(Some("  ".to_string())).unwrap(), "from-file");
    }

    #[test]
    fn test_missing_key_is_missing_credential() {
        let config = Config {
            openai_api_key: Some(String::new()),
            ..Config::default()
        };
        assert!(matches!(
            config.api_key_with(None),
            Err(ConfigError::MissingCredential)
        ));
    }

    #[test]
    fn test_zero_limits_are_raised() {
        let config = Config {
            batch_size: 0,
            max_concurrent_fetches: 0,
            ..Config::default()
        };
        assert_eq!(config.batch_config().batch_size, 1);
        assert_eq!(config.pipeline_config().max_concurrent_fetches, 1);
    }

    #[test]
    fn test_batch_config_mapping() {
        let batch = Config::default().batch_config();
        assert_eq!(batch.pause, Duration::from_millis(300));
        assert_eq!(batch.call_timeout, Duration::from_secs(20));
        assert_eq!(batch.memo_capacity, 512);
    }

    // SEC-015: Debug output masks API key
    #[test]
    fn test_debug_masks_api_key() {
        let config = Config {
            openai_api_key: Some("super-secret-key-12345".to_string()),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
