use super::types::{BreakerStatus, CircuitBreakerConfig, CircuitState};
use crate::error::BoxError;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Predicate deciding whether an operation error counts against the
/// failure threshold. Errors it rejects leave the breaker untouched.
pub type FailureClassifier = Arc<dyn Fn(&BoxError) -> bool + Send + Sync>;

/// Circuit breaker for a single protected service
pub struct CircuitBreaker {
    /// Service identifier
    service: String,
    /// Configuration
    config: CircuitBreakerConfig,
    /// Optional failure classifier; absent means every error counts
    classifier: Option<FailureClassifier>,
    /// Mutable state, serialized under one lock per breaker
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Recorded failures since the last success or reset
    failure_count: u32,
    /// When the most recent failure was recorded
    last_failure: Option<Instant>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker in the closed state
    pub fn new(service: String, config: CircuitBreakerConfig) -> Self {
        info!(
            service = %service,
            failure_threshold = config.failure_threshold,
            recovery_timeout_secs = config.recovery_timeout_secs,
            "Creating circuit breaker"
        );

        Self {
            service,
            config,
            classifier: None,
            state: RwLock::new(State {
                circuit_state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Attach a failure classifier
    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Check whether a call may proceed. An open circuit whose recovery
    /// timeout has elapsed transitions to half-open here, lazily.
    pub async fn allow(&self) -> bool {
        let mut state = self.state.write().await;

        match state.circuit_state {
            CircuitState::Closed => true,
            CircuitState::Open => match state.last_failure {
                Some(at) if at.elapsed() >= self.config.recovery_timeout() => {
                    info!(
                        service = %self.service,
                        "Recovery timeout elapsed, circuit transitioning to half-open"
                    );
                    state.circuit_state = CircuitState::HalfOpen;
                    true
                }
                Some(at) => {
                    debug!(
                        service = %self.service,
                        remaining = ?(self.config.recovery_timeout() - at.elapsed()),
                        "Circuit open, rejecting call"
                    );
                    false
                }
                None => {
                    warn!(service = %self.service, "Circuit open with no recorded failure time");
                    false
                }
            },
            // Probe verdict not recorded yet; keep permitting trial calls
            CircuitState::HalfOpen => true,
        }
    }

    /// Record a successful call. Closes the circuit and clears the
    /// failure count regardless of the state it was in.
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;

        if state.circuit_state == CircuitState::HalfOpen {
            info!(service = %self.service, "Probe call succeeded, circuit closing");
        }

        state.circuit_state = CircuitState::Closed;
        state.failure_count = 0;
    }

    /// Record a failed call. Unclassified errors leave all counters
    /// untouched.
    pub async fn record_failure(&self, err: &BoxError) {
        if let Some(classifier) = &self.classifier {
            if !classifier(err) {
                debug!(
                    service = %self.service,
                    error = %err,
                    "Error not classified as a breaker failure, ignoring"
                );
                return;
            }
        }

        let mut state = self.state.write().await;
        state.failure_count += 1;
        state.last_failure = Some(Instant::now());

        match state.circuit_state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    info!(
                        service = %self.service,
                        failure_count = state.failure_count,
                        "Failure threshold reached, circuit opening"
                    );
                    state.circuit_state = CircuitState::Open;
                } else {
                    debug!(
                        service = %self.service,
                        failure_count = state.failure_count,
                        threshold = self.config.failure_threshold,
                        "Failure recorded in closed state"
                    );
                }
            }
            CircuitState::HalfOpen => {
                warn!(service = %self.service, "Probe call failed, circuit reopening");
                state.circuit_state = CircuitState::Open;
            }
            CircuitState::Open => {
                debug!(service = %self.service, "Failure recorded while circuit already open");
            }
        }
    }

    /// Force the circuit closed and clear the failure count
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.circuit_state = CircuitState::Closed;
        state.failure_count = 0;
        info!(service = %self.service, "Circuit breaker reset");
    }

    /// Current state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.circuit_state
    }

    /// Immutable health snapshot
    pub async fn status(&self) -> BreakerStatus {
        let state = self.state.read().await;
        BreakerStatus {
            service: self.service.clone(),
            state: state.circuit_state,
            failure_count: state.failure_count,
            last_failure: state.last_failure,
        }
    }

    /// Service this breaker guards
    pub fn service(&self) -> &str {
        &self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn probe_error() -> BoxError {
        "connection refused".into()
    }

    #[tokio::test]
    async fn test_breaker_starts_closed() {
        let cb = CircuitBreaker::new("jaeger".to_string(), CircuitBreakerConfig::default());
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.allow().await);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("jaeger".to_string(), config);

        for _ in 0..3 {
            assert!(cb.allow().await);
            cb.record_failure(&probe_error()).await;
        }

        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow().await);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("jaeger".to_string(), config);

        for _ in 0..2 {
            cb.record_failure(&probe_error()).await;
        }
        cb.record_success().await;

        let status = cb.status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);

        // Threshold counts from scratch after the success
        for _ in 0..3 {
            cb.record_failure(&probe_error()).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_until_recovery_timeout() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_secs: 60,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("jaeger".to_string(), config);

        cb.record_failure(&probe_error()).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        // No re-transition before a verdict, but probes keep flowing
        assert!(cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes_circuit() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_secs: 1,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("jaeger".to_string(), config);

        cb.record_failure(&probe_error()).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        let status = cb.status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_circuit() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_secs: 1,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("jaeger".to_string(), config);

        cb.record_failure(&probe_error()).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        let before = cb.status().await.last_failure;
        tokio::time::advance(Duration::from_millis(500)).await;
        cb.record_failure(&probe_error()).await;

        let status = cb.status().await;
        assert_eq!(status.state, CircuitState::Open);
        // Recovery timer restarts from the fresh failure
        assert!(status.last_failure > before);
        assert!(!cb.allow().await);
    }

    #[tokio::test]
    async fn test_classifier_filters_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("jaeger".to_string(), config).with_classifier(Arc::new(
            |err: &BoxError| err.to_string().contains("timeout"),
        ));

        cb.record_failure(&"bad request".into()).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.status().await.failure_count, 0);

        cb.record_failure(&"timeout waiting for backend".into()).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reset_closes_circuit() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("jaeger".to_string(), config);

        cb.record_failure(&probe_error()).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        cb.reset().await;
        let status = cb.status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
        assert!(cb.allow().await);
    }
}
