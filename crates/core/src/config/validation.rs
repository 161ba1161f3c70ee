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

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `api_base_url` is not an http(s) URL
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `apply_timeout_ms` is shorter than `timeout_ms` or exceeds 30 minutes
    /// - `page_size` is 0 or exceeds 500
    /// - `retry` exceeds 10
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        match url::Url::parse(&self.api_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(_) => return Err(invalid("api_base_url", "scheme must be http or https")),
            Err(e) => return Err(invalid("api_base_url", &e.to_string())),
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.apply_timeout_ms < self.timeout_ms {
            return Err(invalid("apply_timeout_ms", "must not be shorter than timeout_ms"));
        }
        if self.apply_timeout_ms > 1_800_000 {
            return Err(invalid("apply_timeout_ms", "must not exceed 30 minutes (1800000ms)"));
        }

        if self.page_size == 0 {
            return Err(invalid("page_size", "must be greater than 0"));
        }
        if self.page_size > 500 {
            return Err(invalid("page_size", "must not exceed 500"));
        }

        if self.retry > 10 {
            return Err(invalid("retry", "must not exceed 10"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.max_retry_delay_ms < self.retry_delay_ms {
            tracing::warn!(
                retry_delay_ms = self.retry_delay_ms,
                max_retry_delay_ms = self.max_retry_delay_ms,
                "max_retry_delay_ms is below retry_delay_ms; every retry waits max_retry_delay_ms"
            );
        }

        Ok(())
    }
}
