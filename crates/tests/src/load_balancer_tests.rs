//! Load balancer rotation, readiness tracking and retry budgets.

use std::time::Duration;

use liteline_core::{
    engine::{EngineEvent, LoadBalancerConfig},
    EngineError, LiteEngine, LoadBalancingEngine, QueryArgs,
};

use crate::mock_infrastructure::{
    any_query, dispatch_log, fail_fast_balancer, query, quick_balancer, served_by, tier, wait_until,
    MockEngine, MOCK_FAILURE_CODE,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_never_ready_peer_is_skipped() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let b = MockEngine::not_ready("b", &log);
    let c = MockEngine::new("c", &log);
    let balancer = tier(&[&a, &b, &c], quick_balancer());

    assert_eq!(balancer.engine_count(), 3);
    assert_eq!(balancer.ready_count(), 2);

    for _ in 0..4 {
        query(balancer.as_ref()).await.unwrap();
    }
    assert_eq!(*log.lock(), vec!["a", "c", "a", "c"]);
    assert_eq!(b.calls(), 0);
}

#[tokio::test]
async fn test_rotation_covers_every_ready_engine() {
    let log = dispatch_log();
    let engines: Vec<_> = (0..5).map(|i| MockEngine::new(&format!("e{i}"), &log)).collect();
    let refs: Vec<_> = engines.iter().collect();
    let balancer = tier(&refs, quick_balancer());

    for _ in 0..10 {
        query(balancer.as_ref()).await.unwrap();
    }
    for engine in &engines {
        assert_eq!(engine.calls(), 2);
    }
    assert_eq!(log.lock()[..5], ["e0", "e1", "e2", "e3", "e4"]);
}

#[tokio::test]
async fn test_silently_unready_engine_is_stepped_over() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let c = MockEngine::new("c", &log);
    let balancer = tier(&[&a, &c], quick_balancer());

    // still ready-listed, but reports not ready when asked
    c.set_ready_silently(false);
    assert_eq!(balancer.ready_count(), 2);

    let first = served_by(query(balancer.as_ref()).await.unwrap());
    let second = served_by(query(balancer.as_ref()).await.unwrap());
    assert_eq!(first, "a");
    assert_eq!(second, "a");
    assert_eq!(c.calls(), 0);
}

#[tokio::test]
async fn test_error_retries_on_next_engine() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let c = MockEngine::new("c", &log);
    a.set_failing(true);
    let balancer = tier(&[&a, &c], quick_balancer());

    let response = query(balancer.as_ref()).await.unwrap();
    assert_eq!(served_by(response), "c");
    assert_eq!(*log.lock(), vec!["a", "c"]);
}

#[tokio::test]
async fn test_retry_budget_returns_last_error() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let c = MockEngine::new("c", &log);
    a.set_failing(true);
    c.set_failing(true);
    let config = LoadBalancerConfig { max_errors_before_throw: 2, retry_delay_ms: 0, ..Default::default() };
    let balancer = tier(&[&a, &c], config);

    let err = query(balancer.as_ref()).await.unwrap_err();
    // budget of 2 means the third failure is returned
    assert_eq!(*log.lock(), vec!["a", "c", "a"]);
    assert_eq!(err, EngineError::Remote { code: MOCK_FAILURE_CODE, message: "a failed".to_string() });
}

#[tokio::test]
async fn test_zero_error_budget_fails_fast() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let c = MockEngine::new("c", &log);
    a.set_failing(true);
    let balancer = tier(&[&a, &c], fail_fast_balancer());

    let err = query(balancer.as_ref()).await.unwrap_err();
    assert!(err.is_remote());
    assert_eq!(c.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_ready_engines() {
    let log = dispatch_log();
    let a = MockEngine::not_ready("a", &log);
    let b = MockEngine::not_ready("b", &log);
    let config = LoadBalancerConfig { max_attempts_until_ready: 3, retry_delay_ms: 100, ..Default::default() };
    let balancer = tier(&[&a, &b], config);

    let started = tokio::time::Instant::now();
    let err = query(balancer.as_ref()).await.unwrap_err();
    assert_eq!(err, EngineError::NoEnginesAvailable);
    assert!(log.lock().is_empty());
    // one retry delay per attempt past the empty ready list
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(400) && elapsed < Duration::from_millis(500), "{elapsed:?}");
}

#[tokio::test]
async fn test_late_ready_engine_joins_rotation() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let b = MockEngine::not_ready("b", &log);
    let balancer = tier(&[&a, &b], quick_balancer());
    assert_eq!(balancer.ready_count(), 1);

    b.set_ready(true);
    assert!(wait_until(EVENT_TIMEOUT, || balancer.ready_count() == 2).await);

    for _ in 0..2 {
        query(balancer.as_ref()).await.unwrap();
    }
    assert_eq!(b.calls(), 1);

    b.fail_connection();
    assert!(wait_until(EVENT_TIMEOUT, || balancer.ready_count() == 1).await);

    a.set_ready(false);
    assert!(wait_until(EVENT_TIMEOUT, || balancer.ready_count() == 0).await);
    assert!(!balancer.check_at_least_one_ready());
}

#[tokio::test]
async fn test_duplicate_engine_is_rejected() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);

    let err = LoadBalancingEngine::new(vec![a.as_engine(), a.as_engine()], quick_balancer()).unwrap_err();
    assert_eq!(err, EngineError::DuplicateEngine);

    let balancer = LoadBalancingEngine::new(vec![a.as_engine()], quick_balancer()).unwrap();
    assert_eq!(balancer.add_engine(a.as_engine()), Err(EngineError::DuplicateEngine));
    assert_eq!(balancer.engine_count(), 1);

    balancer.add_engine(MockEngine::new("b", &log).as_engine()).unwrap();
    assert_eq!(balancer.engine_count(), 2);
}

#[tokio::test]
async fn test_default_timeout_is_passed_down() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let config = LoadBalancerConfig { default_timeout_ms: 1_234, ..quick_balancer() };
    let balancer = tier(&[&a], config);

    query(balancer.as_ref()).await.unwrap();
    assert_eq!(a.last_args().unwrap().timeout, Some(Duration::from_millis(1_234)));

    let explicit = QueryArgs::default().with_timeout(Duration::from_millis(50)).with_await_seqno(7);
    balancer.query(any_query(), explicit).await.unwrap();
    let args = a.last_args().unwrap();
    assert_eq!(args.timeout, Some(Duration::from_millis(50)));
    assert_eq!(args.await_seqno, Some(7));
}

#[tokio::test]
async fn test_close_cascades_to_children() {
    let log = dispatch_log();
    let a = MockEngine::new("a", &log);
    let b = MockEngine::new("b", &log);
    let balancer = tier(&[&a, &b], quick_balancer());
    let mut events = balancer.subscribe();

    assert!(balancer.is_ready());
    balancer.close();

    assert!(balancer.is_closed());
    assert!(!balancer.is_ready());
    assert!(a.is_closed() && b.is_closed());
    assert_eq!(balancer.ready_count(), 0);
    assert_eq!(events.recv().await.unwrap(), EngineEvent::Close);

    let err = query(balancer.as_ref()).await.unwrap_err();
    assert_eq!(err, EngineError::EngineClosed);
    assert!(log.lock().is_empty());
}
