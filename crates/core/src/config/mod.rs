//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (CERTDESK_*)
//! 2. TOML config file (if CERTDESK_CONFIG_FILE set)
//! 3. Built-in defaults

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::query::{QueryDefaults, RetryPolicy};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (CERTDESK_*)
/// 2. TOML config file (if CERTDESK_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the certificate management API.
    ///
    /// Set via CERTDESK_API_BASE_URL environment variable.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Bearer token sent with every API request.
    ///
    /// Set via CERTDESK_API_TOKEN environment variable.
    #[serde(default)]
    pub api_token: Option<String>,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Timeout for apply/reapply calls, which wait on certificate issuance.
    #[serde(default = "default_apply_timeout_ms")]
    pub apply_timeout_ms: u64,

    /// Items per page for list queries.
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// How long fetched data counts as fresh.
    #[serde(default)]
    pub stale_time_ms: u64,

    /// How long an unobserved cache entry is kept.
    #[serde(default = "default_gc_time_ms")]
    pub gc_time_ms: u64,

    /// Retries for transient failures.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Base delay between retries; doubled per attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Upper bound for the retry delay.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:8080/api".into()
}

fn default_user_agent() -> String {
    "certdesk/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_apply_timeout_ms() -> u64 {
    300_000
}

fn default_page_size() -> u64 {
    20
}

fn default_gc_time_ms() -> u64 {
    300_000
}

fn default_retry() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: None,
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            apply_timeout_ms: default_apply_timeout_ms(),
            page_size: default_page_size(),
            stale_time_ms: 0,
            gc_time_ms: default_gc_time_ms(),
            retry: default_retry(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }

    /// Engine defaults shared by every query built on this configuration.
    pub fn query_defaults(&self) -> QueryDefaults {
        QueryDefaults {
            stale_time: Duration::from_millis(self.stale_time_ms),
            gc_time: Duration::from_millis(self.gc_time_ms),
            retry: RetryPolicy {
                max_retries: self.retry,
                base_delay: Duration::from_millis(self.retry_delay_ms),
                max_delay: Duration::from_millis(self.max_retry_delay_ms),
            },
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `CERTDESK_`
    /// 2. TOML file from `CERTDESK_CONFIG_FILE` (if set)
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

        if let Ok(config_path) = std::env::var("CERTDESK_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("CERTDESK_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Token for authenticated endpoints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no token is configured.
    pub fn require_api_token(&self) -> Result<&str, ConfigError> {
        self.api_token.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "api_token".into(),
            hint: "Set CERTDESK_API_TOKEN environment variable".into(),
        })
    }
}
