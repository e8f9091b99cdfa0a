//! Bounded retry with linearly growing delay

use crate::config::RetryConfig;
use crate::error::AirdropResult;

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Retry budget for transport-level failures.
///
/// Attempt `n` (1-based) that fails with a retryable error is followed by a
/// wait of `initial_delay + (n - 1) * delay_increment`, up to `max_attempts`
/// attempts in total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    delay_increment: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, delay_increment: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            delay_increment,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.delay_increment_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Waits between consecutive attempts, in order
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts - 1).map(move |i| self.initial_delay + self.delay_increment * i)
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the budget is spent.
    ///
    /// On exhaustion the last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> AirdropResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AirdropResult<T>>,
    {
        let mut delays = self.delays();
        let mut attempt = 1;

        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => match delays.next() {
                    Some(delay) => {
                        warn!(
                            "{} failed (attempt {}/{}), retrying in {}ms: {}",
                            operation,
                            attempt,
                            self.max_attempts,
                            delay.as_millis(),
                            e
                        );
                        crate::metrics::record_retry(operation);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        warn!("{} failed, max retries reached: {}", operation, e);
                        return Err(e);
                    }
                },
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
