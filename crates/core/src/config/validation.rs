//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - `max_width` or `max_height` is 0
    /// - `max_retry_attempts` is 0
    /// - `max_artifact_size_mb` is set but not positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must be greater than 0".into() });
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must not exceed 50MB".into() });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.max_width == 0 {
            return Err(ConfigError::Invalid { field: "max_width".into(), reason: "must be greater than 0".into() });
        }
        if self.max_height == 0 {
            return Err(ConfigError::Invalid { field: "max_height".into(), reason: "must be greater than 0".into() });
        }

        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_retry_attempts".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if let Some(cap) = self.max_artifact_size_mb
            && cap <= 0.0
        {
            return Err(ConfigError::Invalid {
                field: "max_artifact_size_mb".into(),
                reason: "must be positive when set".into(),
            });
        }

        if let Some(salt) = &self.secret_salt
            && salt.is_empty()
        {
            tracing::warn!("secret_salt is set but empty; a persisted salt will be generated instead");
        }

        Ok(())
    }
}
