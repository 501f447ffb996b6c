//! The builder-assembled hierarchy failing over between mock lite servers.

use std::time::Duration;

use liteline_core::{
    engine::{ConnectionConfig, LoadBalancerConfig, PriorityGroupEngine},
    schema::GetTime,
    EngineError, EngineGroupBuilder, LiteEngine, LiteEngineExt, QueryArgs,
};

use crate::mock_infrastructure::{
    priority_config, wait_until, MockLiteServer, MockServerOptions, ServerBehavior,
};

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const OWN_TIME: i32 = 1_000;
const PUBLIC_TIME: i32 = 2_000;

async fn server(remote_time: i32) -> MockLiteServer {
    MockLiteServer::start(MockServerOptions { remote_time, ..Default::default() }).await.unwrap()
}

fn balancer() -> LoadBalancerConfig {
    LoadBalancerConfig {
        max_errors_before_throw: 0,
        max_attempts_until_ready: 3,
        retry_delay_ms: 10,
        ..LoadBalancerConfig::default()
    }
}

async fn wait_ready(engine: &PriorityGroupEngine) {
    let ready = wait_until(READY_TIMEOUT, || {
        (0..engine.tier_count()).all(|i| engine.tier(i).is_some_and(|t| t.ready_count() > 0))
    })
    .await;
    assert!(ready, "tiers never became ready");
}

async fn remote_time(engine: &PriorityGroupEngine) -> Result<i32, EngineError> {
    engine.call(GetTime, (), QueryArgs::default().with_timeout(Duration::from_secs(2))).await
}

#[tokio::test]
async fn test_calls_prefer_first_group() {
    let own = server(OWN_TIME).await;
    let public = server(PUBLIC_TIME).await;
    let engine = EngineGroupBuilder::new()
        .group(vec![own.peer()])
        .group(vec![public.peer()])
        .balancer_config(balancer())
        .build()
        .unwrap();
    wait_ready(&engine).await;

    for _ in 0..3 {
        assert_eq!(remote_time(&engine).await.unwrap(), OWN_TIME);
    }
    assert!(public.received().is_empty());

    engine.close();
    own.shutdown();
    public.shutdown();
}

#[tokio::test]
async fn test_failing_group_is_suppressed_and_recovers() {
    let own = server(OWN_TIME).await;
    let public = server(PUBLIC_TIME).await;
    let engine = EngineGroupBuilder::new()
        .group(vec![own.peer()])
        .group(vec![public.peer()])
        .balancer_config(balancer())
        .priority_config(priority_config(2, 3, false, 60_000))
        .build()
        .unwrap();
    wait_ready(&engine).await;

    own.set_behavior(ServerBehavior::RemoteError { code: 651, message: "not ready".to_string() });
    for _ in 0..2 {
        let err = remote_time(&engine).await.unwrap_err();
        assert_eq!(err, EngineError::Remote { code: 651, message: "not ready".to_string() });
    }
    assert!(engine.is_suppressed(0));

    // the own group stays connected, so every call counts toward recovery
    assert_eq!(remote_time(&engine).await.unwrap(), PUBLIC_TIME);
    assert_eq!(remote_time(&engine).await.unwrap(), PUBLIC_TIME);

    own.set_behavior(ServerBehavior::Answer);
    assert_eq!(remote_time(&engine).await.unwrap(), OWN_TIME);
    assert!(!engine.is_suppressed(0));

    engine.close();
    own.shutdown();
    public.shutdown();
}

#[tokio::test]
async fn test_unreachable_group_fails_over() {
    let own = server(OWN_TIME).await;
    let public = server(PUBLIC_TIME).await;
    let engine = EngineGroupBuilder::new()
        .group(vec![own.peer()])
        .group(vec![public.peer()])
        .connection_config(ConnectionConfig { reconnect_delay_ms: 50, ..ConnectionConfig::default() })
        .balancer_config(balancer())
        .priority_config(priority_config(1, 8, true, 60_000))
        .build()
        .unwrap();
    wait_ready(&engine).await;

    own.shutdown();
    let own_tier = engine.tier(0).unwrap().clone();
    assert!(wait_until(READY_TIMEOUT, || own_tier.ready_count() == 0).await);

    let err = remote_time(&engine).await.unwrap_err();
    assert_eq!(err, EngineError::NoEnginesAvailable);
    assert!(engine.is_suppressed(0));

    for _ in 0..3 {
        assert_eq!(remote_time(&engine).await.unwrap(), PUBLIC_TIME);
    }

    engine.close();
    public.shutdown();
}

#[tokio::test]
async fn test_group_balances_over_its_peers() {
    let first = server(OWN_TIME).await;
    let second = server(OWN_TIME + 1).await;
    let public = server(PUBLIC_TIME).await;
    let engine = EngineGroupBuilder::new()
        .group(vec![first.peer(), second.peer()])
        .group(vec![public.peer()])
        .balancer_config(balancer())
        .build()
        .unwrap();
    let own_tier = engine.tier(0).unwrap().clone();
    assert!(wait_until(READY_TIMEOUT, || own_tier.ready_count() == 2).await);

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(remote_time(&engine).await.unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![OWN_TIME, OWN_TIME, OWN_TIME + 1, OWN_TIME + 1]);

    engine.close();
    assert!(own_tier.is_closed());
    first.shutdown();
    second.shutdown();
    public.shutdown();
}
