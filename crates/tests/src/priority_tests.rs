//! Tier suppression, error windows and recovery probes.

use std::{sync::Arc, time::Duration};

use liteline_core::{EngineError, LiteEngine, PriorityGroupEngine};
use parking_lot::Mutex;

use crate::mock_infrastructure::{
    dispatch_log, fail_fast_balancer, priority_config, query, served_by, tier, MockEngine,
};

type Messages = Arc<Mutex<Vec<String>>>;

fn two_tiers(
    a: &Arc<MockEngine>,
    b: &Arc<MockEngine>,
    config: liteline_core::engine::PriorityConfig,
) -> (PriorityGroupEngine, Messages) {
    let messages: Messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    let engine = PriorityGroupEngine::new(
        vec![tier(&[a], fail_fast_balancer()), tier(&[b], fail_fast_balancer())],
        config,
    )
    .unwrap()
    .with_debug_sink(Arc::new(move |message: &str| sink.lock().push(message.to_string())));
    (engine, messages)
}

fn count(messages: &Messages, needle: &str) -> usize {
    messages.lock().iter().filter(|m| m.contains(needle)).count()
}

#[tokio::test(start_paused = true)]
async fn test_failures_inside_window_suppress_tier() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let b = MockEngine::new("b", &log);
    a.set_failing(true);
    let (engine, messages) = two_tiers(&a, &b, priority_config(2, 8, false, 1_000));

    assert!(query(&engine).await.is_err());
    assert!(!engine.is_suppressed(0));
    tokio::time::advance(Duration::from_millis(400)).await;
    assert!(query(&engine).await.is_err());
    assert!(engine.is_suppressed(0));

    let response = query(&engine).await.unwrap();
    assert_eq!(served_by(response), "b");
    assert_eq!(*log.lock(), vec!["a", "a", "b"]);
    assert_eq!(count(&messages, "tier 0 was suppressed, accumulated errors = 2"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failures_outside_window_reset_counter() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let b = MockEngine::new("b", &log);
    a.set_failing(true);
    let (engine, messages) = two_tiers(&a, &b, priority_config(2, 8, false, 1_000));

    assert!(query(&engine).await.is_err());
    tokio::time::advance(Duration::from_millis(1_500)).await;
    assert!(query(&engine).await.is_err());

    assert!(!engine.is_suppressed(0));
    assert_eq!(count(&messages, "error counter was reset due to ttl"), 1);
    assert_eq!(b.calls(), 0);

    // the second failure opened a new window, one more inside it suppresses
    assert!(query(&engine).await.is_err());
    assert!(engine.is_suppressed(0));
}

#[tokio::test(start_paused = true)]
async fn test_continuous_availability_restarts_after_gap() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let b = MockEngine::new("b", &log);
    a.set_failing(true);
    let (engine, messages) = two_tiers(&a, &b, priority_config(2, 3, true, 60_000));

    query(&engine).await.unwrap_err();
    query(&engine).await.unwrap_err();
    assert!(engine.is_suppressed(0));
    a.set_failing(false);

    // each call probes the suppressed tier before routing
    let probes = [true, true, false, true, true];
    for ready in probes {
        a.set_ready_silently(ready);
        assert_eq!(served_by(query(&engine).await.unwrap()), "b");
        assert!(engine.is_suppressed(0));
    }
    assert_eq!(count(&messages, "availability counter reset"), 1);

    a.set_ready_silently(true);
    assert_eq!(served_by(query(&engine).await.unwrap()), "a");
    assert!(!engine.is_suppressed(0));
    assert_eq!(count(&messages, "suppressed tier 0 was unsuppressed"), 1);
    assert_eq!(count(&messages, "signaled ready"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_non_continuous_availability_accumulates() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let b = MockEngine::new("b", &log);
    a.set_failing(true);
    let (engine, _) = two_tiers(&a, &b, priority_config(1, 2, false, 60_000));

    query(&engine).await.unwrap_err();
    assert!(engine.is_suppressed(0));
    a.set_failing(false);

    a.set_ready_silently(true);
    query(&engine).await.unwrap();
    a.set_ready_silently(false);
    query(&engine).await.unwrap();
    assert!(engine.is_suppressed(0));

    // the not-ready probe did not discard the earlier one
    a.set_ready_silently(true);
    assert_eq!(served_by(query(&engine).await.unwrap()), "a");
}

#[tokio::test(start_paused = true)]
async fn test_last_tier_is_never_suppressed() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let b = MockEngine::new("b", &log);
    a.set_failing(true);
    b.set_failing(true);
    let (engine, _) = two_tiers(&a, &b, priority_config(2, 8, false, 60_000));

    query(&engine).await.unwrap_err();
    query(&engine).await.unwrap_err();
    assert!(engine.is_suppressed(0));
    // keep tier 0 from earning its way back
    a.set_ready_silently(false);

    for _ in 0..10 {
        query(&engine).await.unwrap_err();
    }
    assert!(!engine.is_suppressed(1));
    assert_eq!(b.calls(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_child_error_is_returned_unchanged() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let b = MockEngine::new("b", &log);
    a.set_failing(true);
    let (engine, _) = two_tiers(&a, &b, priority_config(10, 8, false, 60_000));

    let err = query(&engine).await.unwrap_err();
    assert_eq!(err, EngineError::Remote { code: 500, message: "a failed".to_string() });
}

#[tokio::test(start_paused = true)]
async fn test_interleaved_failures_suppress_once() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let b = MockEngine::new("b", &log);
    a.set_failing(true);
    let (engine, messages) = two_tiers(&a, &b, priority_config(2, 8, false, 60_000));

    let (first, second, third) = tokio::join!(query(&engine), query(&engine), query(&engine));
    assert!(first.is_err() && second.is_err());
    assert_eq!(served_by(third.unwrap()), "b");

    assert!(engine.is_suppressed(0));
    assert_eq!(count(&messages, "was suppressed"), 1);
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn test_close_cascades_to_every_tier() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let b = MockEngine::new("b", &log);
    let (engine, _) = two_tiers(&a, &b, priority_config(2, 8, false, 60_000));
    assert!(engine.is_ready());

    engine.close();
    assert!(engine.is_closed());
    assert!(!engine.is_ready());
    assert!(a.is_closed() && b.is_closed());
    assert_eq!(query(&engine).await.unwrap_err(), EngineError::EngineClosed);
}

#[tokio::test]
async fn test_single_tier_is_rejected() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);

    let err = PriorityGroupEngine::new(vec![tier(&[&a], fail_fast_balancer())], priority_config(2, 8, false, 60_000))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
}
