//! Per-query options and the engine defaults they override.

use std::time::Duration;

use super::RetryPolicy;

/// Defaults applied to every query on a [`QueryClient`](super::QueryClient).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDefaults {
    /// How long fetched data counts as fresh. Zero means stale immediately.
    pub stale_time: Duration,
    /// How long an unobserved entry survives before garbage collection.
    pub gc_time: Duration,
    pub retry: RetryPolicy,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self { stale_time: Duration::ZERO, gc_time: Duration::from_secs(300), retry: RetryPolicy::default() }
    }
}

impl QueryDefaults {
    pub fn resolve(&self, options: &QueryOptions) -> ResolvedOptions {
        ResolvedOptions {
            stale_time: options.stale_time.unwrap_or(self.stale_time),
            gc_time: options.gc_time.unwrap_or(self.gc_time),
            retry: match options.retry {
                Some(max_retries) => self.retry.with_max_retries(max_retries),
                None => self.retry,
            },
            enabled: options.enabled.unwrap_or(true),
        }
    }
}

/// Caller overrides. Unset fields fall back to [`QueryDefaults`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub stale_time: Option<Duration>,
    pub gc_time: Option<Duration>,
    /// Retry count for transient failures.
    pub retry: Option<u32>,
    /// A disabled query never fetches on its own.
    pub enabled: Option<bool>,
}

impl QueryOptions {
    pub fn stale_time(self, stale_time: Duration) -> Self {
        Self { stale_time: Some(stale_time), ..self }
    }

    pub fn gc_time(self, gc_time: Duration) -> Self {
        Self { gc_time: Some(gc_time), ..self }
    }

    pub fn retry(self, retry: u32) -> Self {
        Self { retry: Some(retry), ..self }
    }

    pub fn enabled(self, enabled: bool) -> Self {
        Self { enabled: Some(enabled), ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub retry: RetryPolicy,
    pub enabled: bool,
}
