//! Retry policy for query fetches.
//!
//! Only transient failures (see [`Error::is_transient`]) are retried. The
//! delay doubles per attempt from `base_delay` up to `max_delay`.

use std::future::Future;
use std::time::Duration;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(1), max_delay: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self { max_retries, ..self }
    }

    /// Whether another attempt is allowed after `failures` failed attempts.
    pub fn should_retry(&self, failures: u32, err: &Error) -> bool {
        failures < self.max_retries && err.is_transient()
    }

    /// Delay before the retry that follows `failures` failed attempts.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, Op, Fut>(&self, label: &str, mut op: Op) -> Result<T, Error>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut failures = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(failures, &err) => {
                    let delay = self.delay_for(failures);
                    failures += 1;
                    tracing::warn!(query = label, attempt = failures, ?delay, error = %err, "transient failure, retrying");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    if failures > 0 {
                        tracing::debug!(query = label, failures, error = %err, "giving up");
                    }
                    return Err(err);
                }
            }
        }
    }
}
