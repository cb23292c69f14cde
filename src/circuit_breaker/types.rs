use crate::error::{ResilienceError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally
    Closed,
    /// Circuit is open, calls are rejected
    Open,
    /// Circuit is half-open, probing whether the service recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of recorded failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Duration to wait in open state before allowing a probe call
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Return the gate rejection immediately instead of burning the retry
    /// budget re-probing an open circuit
    #[serde(default)]
    pub fail_fast_on_open: bool,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            fail_fast_on_open: false,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::Config(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier applied per failed attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Scale each delay by a random factor in [0.5, 1.0]
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay_ms == 0 {
            return Err(ResilienceError::Config(
                "base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ResilienceError::Config(
                "max_delay_ms must not be smaller than base_delay_ms".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ResilienceError::Config(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Immutable snapshot of a breaker's health, returned by introspection.
/// Callers never receive a live reference to breaker internals.
#[derive(Debug, Clone)]
pub struct BreakerStatus {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}

impl BreakerStatus {
    pub fn seconds_since_last_failure(&self) -> Option<f64> {
        self.last_failure.map(|at| at.elapsed().as_secs_f64())
    }
}
