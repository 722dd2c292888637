//! Retry with exponential backoff and jitter
//!
//! Transient failures are retried inside the component that hit them; any
//! other failure is returned on the first attempt.

use crate::config::CrawlerConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that know whether another attempt may succeed
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Attempt limit and backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            max,
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base),
            Duration::from_millis(config.backoff_max),
        )
    }

    /// Backoff ceiling after the `attempt`-th failure: `base * 2^(attempt - 1)`, capped at `max`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay before the next attempt, drawn from `[backoff / 2, backoff]`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff(attempt).as_millis() as u64;
        let floor = ceiling / 2;
        Duration::from_millis(floor + fastrand::u64(0..=ceiling - floor))
    }
}

/// Runs `op` until it succeeds, fails non-transiently, or runs out of attempts
///
/// `op` receives the 1-based attempt number. The last error is returned.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
