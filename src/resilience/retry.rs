//! Exponential-backoff retrier.
//!
//! The delay before retry `n` is `min(initial_delay * factor^(n-1), max_delay)`.
//! Errors the caller does not consider retryable propagate on the first
//! failure, and the last error is returned unchanged once retries run out.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::{error, warn};
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; the operation runs at most `max_retries + 1` times.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay slept before retry number `retry` (1-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 1..retry {
            delay = self.grow(delay);
        }
        delay
    }

    fn grow(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op`, retrying failures for which `retryable` returns true.
    ///
    /// `label` only appears in log lines.
    pub async fn run<T, E, F, Fut, P>(&self, label: &str, mut retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: Display,
    {
        let mut delay = self.initial_delay;
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => return Err(e),
                Err(e) if attempt >= self.max_retries => {
                    error!(
                        "{} failed permanently after {} attempts: {}",
                        label,
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    let pause = delay.min(self.max_delay);
                    warn!(
                        "{} attempt {}/{} failed: {} (retrying in {:?})",
                        label,
                        attempt,
                        self.max_retries + 1,
                        e,
                        pause
                    );
                    sleep(pause).await;
                    delay = self.grow(delay);
                }
            }
        }
    }
}
