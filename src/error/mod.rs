use thiserror::Error;

/// Result type for resilience operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Error type produced by a protected operation itself
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Resilience layer error types
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("circuit breaker for '{service}' is open")]
    CircuitOpen { service: String },

    #[error("operation failed: {0}")]
    Operation(#[source] BoxError),

    #[error("retry budget exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<ResilienceError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl ResilienceError {
    /// True if this error is a gate rejection, directly or as the final
    /// error of an exhausted retry loop. Lets callers tell "circuit open"
    /// apart from "operation itself failed".
    pub fn is_circuit_open(&self) -> bool {
        match self {
            ResilienceError::CircuitOpen { .. } => true,
            ResilienceError::RetryExhausted { source, .. } => source.is_circuit_open(),
            _ => false,
        }
    }

    /// Number of attempts consumed, if this error came out of a retry loop
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ResilienceError::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The innermost error, unwrapping any retry exhaustion layer
    pub fn final_cause(&self) -> &ResilienceError {
        match self {
            ResilienceError::RetryExhausted { source, .. } => source.final_cause(),
            other => other,
        }
    }
}
