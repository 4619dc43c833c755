//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (PIXMIRROR_*)
//! 2. TOML config file (if PIXMIRROR_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (PIXMIRROR_*)
/// 2. TOML config file (if PIXMIRROR_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite cache ledger.
    ///
    /// Set via PIXMIRROR_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory holding cached image artifacts.
    ///
    /// Set via PIXMIRROR_CACHE_DIR environment variable.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Placeholder image copied into the artifact slot when a fetch has
    /// failed or been skipped.
    ///
    /// Set via PIXMIRROR_FALLBACK_IMAGE environment variable.
    #[serde(default = "default_fallback_image")]
    pub fallback_image: PathBuf,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via PIXMIRROR_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds, applied to both the size
    /// probe and the full fetch.
    ///
    /// Set via PIXMIRROR_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum bytes to fetch per request.
    ///
    /// Set via PIXMIRROR_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Declared-size threshold in MB above which a newly seeded source is
    /// permanently skipped instead of ever being fetched. Unset means no cap.
    ///
    /// Set via PIXMIRROR_MAX_ARTIFACT_SIZE_MB environment variable.
    #[serde(default)]
    pub max_artifact_size_mb: Option<f64>,

    /// Resize bound for cached artifacts.
    ///
    /// Set via PIXMIRROR_MAX_WIDTH environment variable.
    #[serde(default = "default_max_width")]
    pub max_width: u32,

    /// Resize bound for cached artifacts.
    ///
    /// Set via PIXMIRROR_MAX_HEIGHT environment variable.
    #[serde(default = "default_max_height")]
    pub max_height: u32,

    /// Consecutive failure count after which a source is given up on.
    ///
    /// Set via PIXMIRROR_MAX_RETRY_ATTEMPTS environment variable.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Cache regardless of scheme/security comparison. Read by the embedding
    /// hook layer when deciding which URLs to route through the proxy; the
    /// core itself does not consult it.
    ///
    /// Set via PIXMIRROR_ALWAYS_CACHE environment variable.
    #[serde(default)]
    pub always_cache: bool,

    /// Secret salt for key derivation. When unset, a salt is generated on
    /// first use and persisted in the ledger's settings table.
    ///
    /// Set via PIXMIRROR_SECRET_SALT environment variable.
    #[serde(default)]
    pub secret_salt: Option<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./pixmirror-cache.sqlite")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./image-cache")
}

fn default_fallback_image() -> PathBuf {
    PathBuf::from("./fallback.png")
}

fn default_user_agent() -> String {
    "pixmirror/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_max_width() -> u32 {
    640
}

fn default_max_height() -> u32 {
    480
}

fn default_max_retry_attempts() -> u32 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            cache_dir: default_cache_dir(),
            fallback_image: default_fallback_image(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            max_artifact_size_mb: None,
            max_width: default_max_width(),
            max_height: default_max_height(),
            max_retry_attempts: default_max_retry_attempts(),
            always_cache: false,
            secret_salt: None,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `PIXMIRROR_`
    /// 2. TOML file from `PIXMIRROR_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PIXMIRROR_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("PIXMIRROR_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./pixmirror-cache.sqlite"));
        assert_eq!(config.cache_dir, PathBuf::from("./image-cache"));
        assert_eq!(config.user_agent, "pixmirror/0.1");
        assert_eq!(config.timeout_ms, 20_000);
        assert_eq!(config.max_bytes, 5_242_880);
        assert_eq!(config.max_width, 640);
        assert_eq!(config.max_height, 480);
        assert_eq!(config.max_retry_attempts, 10);
        assert!(config.max_artifact_size_mb.is_none());
        assert!(!config.always_cache);
        assert!(config.secret_salt.is_none());
    }

    #[test]
    fn test_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
    }
}
