//! Failover and retry behavior of the resilient executor

mod test_utils;

use marketplace_rpc_gateway::providers::{BackoffPolicy, RetryPolicy};
use marketplace_rpc_gateway::GatewayError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_utils::*;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_scenario_a_fails_over_once() {
    let faults = Faults::new();
    faults.fail("p1");
    let executor = scripted_executor(
        &endpoint_configs(&["p1", "p2", "p3"]),
        &faults,
        linear_policy(3, 100),
    );
    executor.registry().mark_unhealthy("p3", "down before the call");
    let transitions_before = executor.registry().transition_count();

    let served_by = Mutex::new(Vec::new());
    let started = Instant::now();
    let value = executor
        .execute(|session| {
            served_by.lock().push(session.endpoint.clone());
            async move { session.call("0x2a").await }
        })
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(value, "0x2a");
    assert_eq!(*served_by.lock(), vec!["p1", "p2"]);
    assert_eq!(executor.registry().transition_count() - transitions_before, 1);
    assert!(!executor.registry().get("p1").unwrap().is_healthy());
    assert!(executor.registry().get("p2").unwrap().is_healthy());

    // exactly one backoff delay of 1x base
    assert!(elapsed >= Duration::from_millis(100), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(300), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn test_scenario_b_exhausts_all_endpoints() {
    let faults = Faults::new();
    for name in ["p1", "p2", "p3"] {
        faults.fail(name);
    }
    let executor = scripted_executor(
        &endpoint_configs(&["p1", "p2", "p3"]),
        &faults,
        linear_policy(3, 100),
    );

    let calls = AtomicU32::new(0);
    let started = Instant::now();
    let result = executor
        .execute(|session| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { session.call(()).await }
        })
        .await;
    let elapsed = started.elapsed();

    match result {
        Err(GatewayError::ExhaustedRetries {
            attempts,
            endpoints_tried,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            assert_eq!(endpoints_tried, vec!["p1", "p2", "p3"]);
            assert!(last_error.to_string().contains("p3"));
        }
        other => panic!("expected ExhaustedRetries, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(executor.registry().healthy_count(), 0);

    // backoff after the first and second failures (1x + 2x), none after the last
    assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn test_single_flip_before_next_attempt() {
    let faults = Faults::new();
    faults.fail("p1");
    let executor = scripted_executor(
        &endpoint_configs(&["p1", "p2"]),
        &faults,
        linear_policy(3, 1),
    );
    let registry = Arc::clone(executor.registry());

    let observed = Mutex::new(Vec::new());
    executor
        .execute(|session| {
            observed
                .lock()
                .push((session.endpoint.clone(), registry.transition_count()));
            async move { session.call(()).await }
        })
        .await
        .unwrap();

    let observed = observed.lock();
    assert_eq!(observed.len(), 2);
    assert_eq!(observed[0], ("p1".to_string(), 0));
    assert_eq!(observed[1], ("p2".to_string(), 1));
}

#[tokio::test]
async fn test_terminates_after_exactly_n_attempts() {
    let faults = Faults::new();
    faults.fail("p1");
    faults.fail("p2");
    let policy = RetryPolicy::new(5, BackoffPolicy::constant(Duration::from_millis(1)));
    let executor = scripted_executor(&endpoint_configs(&["p1", "p2"]), &faults, policy);

    let calls = AtomicU32::new(0);
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute(|session| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { session.call(()).await }
        }),
    )
    .await
    .expect("executor must not hang");

    let err = result.unwrap_err();
    assert_eq!(err.attempts(), Some(5));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(
        err.user_message(),
        "Service temporarily unavailable, please try again later"
    );
}

#[tokio::test]
async fn test_permanent_error_is_not_retried() {
    let faults = Faults::new();
    let executor = scripted_executor(
        &endpoint_configs(&["p1", "p2"]),
        &faults,
        linear_policy(3, 1),
    );

    let calls = AtomicU32::new(0);
    let result: marketplace_rpc_gateway::Result<()> = executor
        .execute(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::permanent("invalid address")) }
        })
        .await;

    assert!(matches!(result, Err(GatewayError::PermanentOperation { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(executor.registry().transition_count(), 0);
}

#[tokio::test]
async fn test_caller_cancellation_during_backoff() {
    let faults = Faults::new();
    faults.fail("p1");
    faults.fail("p2");
    let executor = scripted_executor(
        &endpoint_configs(&["p1", "p2"]),
        &faults,
        linear_policy(3, 10_000),
    );

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let started = Instant::now();
    let result = executor
        .execute_with_cancel(&cancel, |session| async move { session.call(()).await })
        .await;

    assert!(matches!(result, Err(GatewayError::Cancelled { attempts: 1 })));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_caller_cancellation_during_attempt() {
    let faults = Faults::new();
    let executor = scripted_executor(&endpoint_configs(&["slow"]), &faults, linear_policy(3, 1));

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let result = executor
        .execute_with_cancel(&cancel, |session| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            session.call(()).await
        })
        .await;

    assert!(matches!(result, Err(GatewayError::Cancelled { .. })));
    // an abandoned attempt says nothing about endpoint health
    assert_eq!(executor.registry().transition_count(), 0);
}

#[tokio::test]
async fn test_result_does_not_depend_on_serving_endpoint() {
    let healthy = Faults::new();
    let degraded = Faults::new();
    degraded.fail("p1");

    let direct = scripted_executor(&endpoint_configs(&["p1", "p2"]), &healthy, linear_policy(3, 1));
    let failed_over = scripted_executor(
        &endpoint_configs(&["p1", "p2"]),
        &degraded,
        linear_policy(3, 1),
    );

    let a = direct
        .execute(|session| async move { session.call(1_000_000u64).await })
        .await
        .unwrap();
    let b = failed_over
        .execute(|session| async move { session.call(1_000_000u64).await })
        .await
        .unwrap();

    assert_eq!(a, b);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_flip() {
    let faults = Faults::new();
    faults.fail("p1");
    let executor = Arc::new(scripted_executor(
        &endpoint_configs(&["p1", "p2", "p3"]),
        &faults,
        linear_policy(3, 5),
    ));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                executor
                    .execute(|session| async move { session.call(i).await })
                    .await
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap().unwrap(), i as i32);
    }

    assert_eq!(executor.registry().transition_count(), 1);
    assert!(executor.registry().get("p2").unwrap().is_healthy());
    assert_eq!(executor.metrics().successful_requests, 16);
}
