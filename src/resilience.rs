//! Timeout and retry helpers for storage calls, plus the backoff schedule the
//! Redis fan-out listener reconnects with.
//!
//! - **Timeout**: every repository call is bounded; expiry becomes
//!   [`StorageError::Timeout`].
//! - **Retry**: exponential backoff with jitter, applied only to errors the
//!   caller marks as safe to repeat (write conflicts).

use crate::storage::{StorageError, StorageResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Execute a storage future with a deadline
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(duration)),
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Execute `f` until it succeeds, fails with an error `should_retry` rejects,
/// or `max_retries` is exhausted (the last error is returned).
pub async fn with_retry<F, Fut, T, E, P>(
    config: &RetryConfig,
    should_retry: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt > config.max_retries {
                    warn!(error = %e, max_retries = config.max_retries, "giving up after retries");
                    return Err(e);
                }

                let delay = calculate_backoff(backoff, config.jitter);
                warn!(
                    error = %e,
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;

                backoff = next_backoff(backoff, config);
            }
        }
    }
}

/// Grow `current` by the multiplier, capped at `max_backoff`.
pub(crate) fn next_backoff(current: Duration, config: &RetryConfig) -> Duration {
    Duration::from_millis(
        ((current.as_millis() as f64 * config.backoff_multiplier)
            .min(config.max_backoff.as_millis() as f64)) as u64,
    )
}

pub(crate) fn calculate_backoff(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    } else {
        base
    }
}
