pub mod circuit_breaker;
pub mod config;
pub mod degradation;
pub mod error;
pub mod probe;

pub use circuit_breaker::{
    BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitState, ProtectedExecutor,
    ResilienceRegistry, RetryConfig, RetryPolicy,
};
pub use degradation::{DegradationCoordinator, Outcome};
pub use error::{BoxError, ResilienceError, Result};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backstop=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
