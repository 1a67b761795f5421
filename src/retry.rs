//! Bounded retry with exponential backoff.
//!
//! The retrier never decides on its own whether a failure is worth another
//! attempt: the error type reports that through [`Retryable`], which providers
//! fill in at the point where they first observe the upstream fault.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Upper bound for a single backoff sleep.
pub const MAX_DELAY: Duration = Duration::from_secs(300);

/// Errors that know whether the failed operation may be attempted again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retry configuration for provider calls.
///
/// With `backoff_factor > 1` each sleep is strictly longer than the previous
/// one until it reaches [`MAX_DELAY`]; from then on every sleep is `MAX_DELAY`.
/// The defaults (2s, 4s, 8s) never reach the cap.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    /// Sleep before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every retry.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Total number of times the operation may be invoked.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to use after `delay` has been slept once.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 1.0 {
            self.backoff_factor
        } else {
            1.0
        };

        Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
            .map(|d| d.min(MAX_DELAY))
            .unwrap_or(MAX_DELAY)
    }
}

/// Run `operation` until it succeeds, fails fatally, or runs out of retries.
///
/// Fatal errors are returned immediately without sleeping. When retries are
/// exhausted the last error is returned.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = config.max_attempts();
    let mut delay = config.initial_delay;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            log::warn!("Non-retryable error on attempt {}: {}", attempt, err);
            return Err(err);
        }

        if attempt >= max_attempts {
            log::error!("All {} attempts failed, last error: {}", max_attempts, err);
            return Err(err);
        }

        log::warn!(
            "Attempt {}/{} failed: {}. Retrying in {:.1}s",
            attempt,
            max_attempts,
            err,
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        delay = config.next_delay(delay);
    }
}
