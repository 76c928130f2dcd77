//! Exponential backoff for the primary weather fetch.
//!
//! Only transient failures are retried (timeouts, connection failures,
//! 5xx, 408 and 429). Everything else is returned after the first attempt.

use std::{fmt::Debug, future::Future, time::Duration};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::provider::ProviderError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 250;
pub const DEFAULT_MAX_DELAY_MS: u64 = 4_000;
pub const DEFAULT_JITTER: f64 = 0.2;

/// Waits between attempts. Swapped out in tests so no real time passes.
#[async_trait]
pub trait Sleeper: Send + Sync + Debug {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomly added or removed, 0.0..=1.0.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, jitter: f64) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// `sample` is a uniform value in `0.0..1.0`; 0.5 yields the un-jittered delay.
    pub fn delay_for_retry(&self, retry: u32, sample: f64) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let exp_ms = base_ms.saturating_mul(factor).min(max_ms);

        let spread = self.jitter.clamp(0.0, 1.0) * (2.0 * sample.clamp(0.0, 1.0) - 1.0);
        let jittered = (exp_ms as f64 * (1.0 + spread)).round().max(0.0) as u64;
        Duration::from_millis(jittered.min(max_ms))
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        sleeper: &dyn Sleeper,
        mut operation: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "request succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => {
                    debug!(attempt, error = %err, "non-retryable failure");
                    return Err(err);
                }
                Err(err) if attempt >= attempts => {
                    error!(attempts, error = %err, "all retry attempts exhausted");
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for_retry(attempt, fastrand::f64());
                    warn!(
                        attempt,
                        of = attempts,
                        ?delay,
                        error = %err,
                        "transient failure, backing off"
                    );
                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Records requested delays instead of sleeping.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSleeper {
    pub(crate) slept: parking_lot::Mutex<Vec<Duration>>,
}

#[cfg(test)]
#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
    }
}
