use super::breaker::{CircuitBreaker, FailureClassifier};
use super::retry::RetryPolicy;
use super::types::{BreakerStatus, CircuitBreakerConfig, RetryConfig};
use crate::error::{BoxError, ResilienceError, Result};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Breaker and retry policy composed for one named service. Every retry
/// attempt re-checks the gate: a rejection consumes an attempt and its
/// backoff sleep exactly like an ordinary failure, unless
/// `fail_fast_on_open` is set.
#[derive(Debug)]
pub struct ProtectedExecutor {
    service: String,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    fail_fast_on_open: bool,
}

impl ProtectedExecutor {
    pub fn new(
        service: String,
        breaker_config: CircuitBreakerConfig,
        retry_config: RetryConfig,
    ) -> Self {
        let fail_fast_on_open = breaker_config.fail_fast_on_open;
        Self {
            breaker: CircuitBreaker::new(service.clone(), breaker_config),
            retry: RetryPolicy::new(retry_config),
            service,
            fail_fast_on_open,
        }
    }

    /// Attach a failure classifier to the underlying breaker
    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.breaker = self.breaker.with_classifier(classifier);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `op` under circuit and retry protection
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        self.execute_cancellable(op, &CancellationToken::new())
            .await
    }

    /// Run `op` under circuit and retry protection; a triggered token
    /// aborts the loop immediately and surfaces `Cancelled`
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        mut op: F,
        token: &CancellationToken,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            if token.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }

            let err = match self.attempt_once(&mut op, token).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            service = %self.service,
                            attempt = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(err @ ResilienceError::Cancelled) => return Err(err),
                Err(err) => err,
            };

            if self.fail_fast_on_open && matches!(err, ResilienceError::CircuitOpen { .. }) {
                debug!(service = %self.service, "Circuit open, failing fast");
                return Err(err);
            }

            attempt += 1;
            if attempt >= max_attempts {
                warn!(
                    service = %self.service,
                    attempts = attempt,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(ResilienceError::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.retry.next_delay(attempt - 1);
            warn!(
                service = %self.service,
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

    /// One gated attempt: gate rejection never reaches the operation and
    /// never touches the breaker's counters
    async fn attempt_once<T, F, Fut>(&self, op: &mut F, token: &CancellationToken) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        if !self.breaker.allow().await {
            return Err(ResilienceError::CircuitOpen {
                service: self.service.clone(),
            });
        }

        let outcome = tokio::select! {
            _ = token.cancelled() => return Err(ResilienceError::Cancelled),
            outcome = op() => outcome,
        };

        match outcome {
            Ok(value) => {
                self.breaker.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.breaker.record_failure(&err).await;
                Err(ResilienceError::Operation(err))
            }
        }
    }
}

/// Thread-safe registry owning one protected executor per service name.
/// Entries are created on first reference and live for the registry's
/// lifetime; reset mutates in place, it never removes. Constructed
/// explicitly and shared by `Arc` — there is no process-wide instance.
#[derive(Debug)]
pub struct ResilienceRegistry {
    executors: DashMap<String, Arc<ProtectedExecutor>>,
    default_breaker: CircuitBreakerConfig,
    default_retry: RetryConfig,
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceRegistry {
    pub fn new() -> Self {
        Self::with_defaults(CircuitBreakerConfig::default(), RetryConfig::default())
    }

    /// Create a registry whose executors use the given configs unless a
    /// first reference supplies its own
    pub fn with_defaults(breaker: CircuitBreakerConfig, retry: RetryConfig) -> Self {
        Self {
            executors: DashMap::new(),
            default_breaker: breaker,
            default_retry: retry,
        }
    }

    /// Return the executor for `name`, constructing it atomically on
    /// first reference. Concurrent first uses of the same name never
    /// create duplicate breakers.
    pub fn get_or_create(
        &self,
        name: &str,
        breaker_config: Option<CircuitBreakerConfig>,
        retry_config: Option<RetryConfig>,
    ) -> Arc<ProtectedExecutor> {
        self.executors
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(service = name, "Registering protected executor");
                Arc::new(ProtectedExecutor::new(
                    name.to_string(),
                    breaker_config.unwrap_or_else(|| self.default_breaker.clone()),
                    retry_config.unwrap_or_else(|| self.default_retry.clone()),
                ))
            })
            .clone()
    }

    /// Run `op` under the named service's circuit and retry protection
    pub async fn execute<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        self.get_or_create(name, None, None).execute(op).await
    }

    /// Like `execute`, with an abort signal
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        name: &str,
        op: F,
        token: &CancellationToken,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        self.get_or_create(name, None, None)
            .execute_cancellable(op, token)
            .await
    }

    /// Health snapshot for `name`; `None` if no breaker was ever created
    /// for it. Never creates one.
    pub async fn status(&self, name: &str) -> Option<BreakerStatus> {
        let executor = self.executors.get(name).map(|entry| entry.value().clone())?;
        Some(executor.breaker().status().await)
    }

    /// Snapshot over every currently registered service
    pub async fn all_statuses(&self) -> Vec<BreakerStatus> {
        let executors: Vec<Arc<ProtectedExecutor>> = self
            .executors
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut statuses = Vec::with_capacity(executors.len());
        for executor in executors {
            statuses.push(executor.breaker().status().await);
        }
        statuses
    }

    /// Force the named breaker closed. Returns false if nothing is
    /// registered under `name` — no entry is created.
    pub async fn reset(&self, name: &str) -> bool {
        match self.executors.get(name).map(|entry| entry.value().clone()) {
            Some(executor) => {
                executor.breaker().reset().await;
                true
            }
            None => {
                info!(service = name, "No circuit breaker registered, nothing to reset");
                false
            }
        }
    }

    /// Names of all registered services
    pub fn services(&self) -> Vec<String> {
        self.executors.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
