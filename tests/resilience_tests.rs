use backstop::circuit_breaker::{
    CircuitBreakerConfig, CircuitState, ResilienceRegistry, RetryConfig,
};
use backstop::degradation::{operation, DegradationCoordinator, Outcome};
use backstop::error::{BoxError, ResilienceError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn single_attempt_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 1,
        base_delay_ms: 10,
        max_delay_ms: 100,
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_breaker_lifecycle_end_to_end() {
    let registry = ResilienceRegistry::with_defaults(
        CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            fail_fast_on_open: false,
        },
        single_attempt_retry(),
    );
    let backend = "jaeger";

    // Five consecutive failing calls open the circuit
    for _ in 0..5 {
        let result: Result<(), _> = registry
            .execute(backend, || async { Err("connection refused".into()) })
            .await;
        assert!(result.is_err());
    }
    let status = registry.status(backend).await.unwrap();
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.failure_count, 5);

    // A sixth call is rejected at the gate even though the operation
    // would now succeed; the operation never runs
    let invocations = Arc::new(AtomicU32::new(0));
    let invocations_clone = invocations.clone();
    let rejected = registry
        .execute(backend, || {
            let invocations = invocations_clone.clone();
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>("up")
            }
        })
        .await;
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert!(rejected.unwrap_err().is_circuit_open());

    // After the recovery timeout the next call half-opens, runs, and
    // closes the circuit on success
    tokio::time::advance(Duration::from_secs(60)).await;
    let recovered = registry
        .execute(backend, || async { Ok::<_, BoxError>("up") })
        .await;
    assert!(recovered.is_ok());

    let status = registry.status(backend).await.unwrap();
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);
}

#[tokio::test]
async fn test_gate_rejection_distinguishable_from_operation_failure() {
    let registry = ResilienceRegistry::with_defaults(
        CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_secs: 60,
            fail_fast_on_open: false,
        },
        single_attempt_retry(),
    );

    let failed: Result<(), _> = registry
        .execute("loki", || async { Err("connection refused".into()) })
        .await;
    let failed = failed.unwrap_err();
    assert!(!failed.is_circuit_open());
    assert!(matches!(
        failed.final_cause(),
        ResilienceError::Operation(_)
    ));

    let rejected: Result<(), _> = registry
        .execute("loki", || async { Ok(()) })
        .await;
    let rejected = rejected.unwrap_err();
    assert!(rejected.is_circuit_open());
    assert!(matches!(
        rejected.final_cause(),
        ResilienceError::CircuitOpen { .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_not_lost() {
    let registry = Arc::new(ResilienceRegistry::with_defaults(
        CircuitBreakerConfig {
            failure_threshold: 1000,
            recovery_timeout_secs: 60,
            fail_fast_on_open: false,
        },
        RetryConfig {
            max_attempts: 1,
            base_delay_ms: 1,
            max_delay_ms: 1,
            backoff_multiplier: 1.0,
            jitter: false,
        },
    ));

    let failures: u32 = 32;
    let mut handles = Vec::new();
    for _ in 0..failures {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let _: Result<(), _> = registry
                .execute("stressed", || async { Err("down".into()) })
                .await;
        }));
    }
    // Successes against a different name never touch the stressed breaker
    for _ in 0..failures {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let _ = registry
                .execute("healthy", || async { Ok::<_, BoxError>(()) })
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stressed = registry.status("stressed").await.unwrap();
    assert_eq!(stressed.failure_count, failures);
    let healthy = registry.status("healthy").await.unwrap();
    assert_eq!(healthy.failure_count, 0);
    assert_eq!(healthy.state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_surfaces_cancelled_outcome() {
    let registry = Arc::new(ResilienceRegistry::with_defaults(
        CircuitBreakerConfig::default(),
        RetryConfig {
            max_attempts: 10,
            base_delay_ms: 30_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 1.0,
            jitter: false,
        },
    ));

    let token = CancellationToken::new();
    let handle = {
        let registry = registry.clone();
        let token = token.clone();
        tokio::spawn(async move {
            registry
                .execute_cancellable(
                    "slow",
                    || async { Err::<(), BoxError>("down".into()) },
                    &token,
                )
                .await
        })
    };

    // First attempt fails and the loop parks in its backoff sleep
    tokio::task::yield_now().await;
    token.cancel();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(ResilienceError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn test_degradation_aggregates_mixed_outcomes() {
    let registry = Arc::new(ResilienceRegistry::with_defaults(
        CircuitBreakerConfig::default(),
        RetryConfig {
            max_attempts: 2,
            base_delay_ms: 10,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter: false,
        },
    ));
    let coordinator = DegradationCoordinator::new(registry.clone());

    let mut primaries: HashMap<String, _> = HashMap::new();
    primaries.insert(
        "healthy".to_string(),
        operation(|| async { Ok("up".to_string()) }),
    );
    primaries.insert(
        "degraded".to_string(),
        operation(|| async { Err::<String, _>("primary down".into()) }),
    );
    primaries.insert(
        "broken".to_string(),
        operation(|| async { Err::<String, _>("primary down".into()) }),
    );

    let mut fallbacks: HashMap<String, _> = HashMap::new();
    fallbacks.insert(
        "degraded".to_string(),
        operation(|| async { Ok("standby".to_string()) }),
    );
    fallbacks.insert(
        "broken".to_string(),
        operation(|| async { Err::<String, _>("fallback down".into()) }),
    );

    let outcomes = coordinator.execute_with_fallback(primaries, fallbacks).await;
    assert_eq!(outcomes.len(), 3);

    assert!(matches!(&outcomes["healthy"], Outcome::Success(r) if r == "up"));

    match &outcomes["degraded"] {
        Outcome::FallbackSuccess { result, .. } => assert_eq!(result, "standby"),
        other => panic!("expected FallbackSuccess, got {other:?}"),
    }

    match &outcomes["broken"] {
        Outcome::Failed {
            error,
            fallback_error: Some(fallback_error),
        } => {
            assert!(error.to_string().contains("primary down"));
            assert!(fallback_error.to_string().contains("fallback down"));
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    // Fallback breakers live under derived names
    assert!(registry.status("degraded_fallback").await.is_some());
    assert!(registry.status("broken_fallback").await.is_some());
    assert!(registry.status("healthy_fallback").await.is_none());
}

#[tokio::test]
async fn test_reset_does_not_create_state() {
    let registry = ResilienceRegistry::new();
    assert!(!registry.reset("never-seen").await);
    assert!(registry.status("never-seen").await.is_none());
    assert!(registry.all_statuses().await.is_empty());
}
