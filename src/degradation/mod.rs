use crate::circuit_breaker::ResilienceRegistry;
use crate::error::{BoxError, ResilienceError};
use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// An opaque protected operation. Invoked fresh for every retry attempt,
/// so it must be callable repeatedly.
pub type Operation<T> =
    Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<T, BoxError>> + Send + Sync>;

/// Box a closure into an [`Operation`]
pub fn operation<T, F, Fut>(f: F) -> Operation<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Result of one primary/fallback pair. Failures are data at this layer,
/// never propagated errors.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Primary operation succeeded
    Success(T),
    /// Primary failed, fallback succeeded
    FallbackSuccess {
        result: T,
        original_error: ResilienceError,
    },
    /// Primary failed and no fallback succeeded
    Failed {
        error: ResilienceError,
        fallback_error: Option<ResilienceError>,
    },
}

impl<T> Outcome<T> {
    /// True when a result was produced, degraded or not
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_) | Outcome::FallbackSuccess { .. })
    }

    /// True when the result came from the fallback
    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::FallbackSuccess { .. })
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::FallbackSuccess { .. } => "fallback_success",
            Outcome::Failed { .. } => "failed",
        }
    }

    /// The produced value, if any
    pub fn result(&self) -> Option<&T> {
        match self {
            Outcome::Success(result) | Outcome::FallbackSuccess { result, .. } => Some(result),
            Outcome::Failed { .. } => None,
        }
    }
}

/// Runs named primary operations through the registry, substituting a
/// fallback operation (protected under a derived name) when a primary
/// fails, and aggregates outcomes.
#[derive(Debug, Clone)]
pub struct DegradationCoordinator {
    registry: Arc<ResilienceRegistry>,
}

impl DegradationCoordinator {
    pub fn new(registry: Arc<ResilienceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ResilienceRegistry> {
        &self.registry
    }

    /// Run every primary concurrently; entries are independent of each
    /// other. A primary's fallback runs under `{name}_fallback`, a
    /// separate breaker/retry state.
    pub async fn execute_with_fallback<T: Send + 'static>(
        &self,
        primaries: HashMap<String, Operation<T>>,
        fallbacks: HashMap<String, Operation<T>>,
    ) -> HashMap<String, Outcome<T>> {
        let tasks = primaries.into_iter().map(|(name, primary)| {
            let fallback = fallbacks.get(&name).cloned();
            async move {
                let outcome = self.run_one(&name, primary, fallback).await;
                (name, outcome)
            }
        });

        join_all(tasks).await.into_iter().collect()
    }

    async fn run_one<T>(
        &self,
        name: &str,
        primary: Operation<T>,
        fallback: Option<Operation<T>>,
    ) -> Outcome<T> {
        let primary_error = match self.registry.execute(name, || primary()).await {
            Ok(result) => return Outcome::Success(result),
            Err(err) => err,
        };

        let Some(fallback) = fallback else {
            warn!(service = name, error = %primary_error, "Primary failed, no fallback configured");
            return Outcome::Failed {
                error: primary_error,
                fallback_error: None,
            };
        };

        let fallback_name = format!("{name}_fallback");
        warn!(
            service = name,
            fallback = %fallback_name,
            error = %primary_error,
            "Primary failed, attempting fallback"
        );

        match self.registry.execute(&fallback_name, || fallback()).await {
            Ok(result) => {
                info!(service = name, fallback = %fallback_name, "Fallback succeeded");
                Outcome::FallbackSuccess {
                    result,
                    original_error: primary_error,
                }
            }
            Err(fallback_err) => Outcome::Failed {
                error: primary_error,
                fallback_error: Some(fallback_err),
            },
        }
    }
}
