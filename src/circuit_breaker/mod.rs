pub mod breaker;
pub mod registry;
pub mod retry;
pub mod types;

pub use breaker::{CircuitBreaker, FailureClassifier};
pub use registry::{ProtectedExecutor, ResilienceRegistry};
pub use retry::RetryPolicy;
pub use types::{BreakerStatus, CircuitBreakerConfig, CircuitState, RetryConfig};
