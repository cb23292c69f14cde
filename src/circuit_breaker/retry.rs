use super::types::RetryConfig;
use crate::error::{ResilienceError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Attempt driver with exponential backoff and optional jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Attempts the driver will make, never less than one
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Deterministic delay after failed attempt `attempt` (0-indexed):
    /// min(base * multiplier^attempt, max), jitter excluded.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw =
            self.config.base_delay_ms as f64 * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay to actually sleep after failed attempt `attempt`, with the
    /// jitter factor (uniform in [0.5, 1.0]) applied when enabled
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.config.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }

    /// Invoke `op` up to `max_attempts` times, sleeping between failed
    /// attempts (never after the last). The final failure is returned
    /// wrapped with the attempt count consumed.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_cancellable(op, &CancellationToken::new())
            .await
    }

    /// Like `execute`, but a triggered token aborts the loop immediately,
    /// including mid-sleep, and surfaces `Cancelled`. The in-flight
    /// attempt's future is dropped; cancellation is not propagated into
    /// the operation itself.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        mut op: F,
        token: &CancellationToken,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            if token.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }

            let outcome = tokio::select! {
                _ = token.cancelled() => return Err(ResilienceError::Cancelled),
                outcome = op() => outcome,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "Retry budget exhausted");
                return Err(ResilienceError::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.next_delay(attempt - 1);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Attempt failed, retrying after backoff"
            );

            tokio::select! {
                _ = token.cancelled() => return Err(ResilienceError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
