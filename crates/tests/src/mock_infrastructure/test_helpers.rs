//! Test Helper Functions and Utilities

use std::{future::Future, sync::Arc, time::Duration};

use liteline_core::{
    engine::{LoadBalancerConfig, PriorityConfig},
    schema::{AnyResponse, Call, GetTime, Query},
    EngineError, LiteEngine, LoadBalancingEngine, QueryArgs,
};

use super::mock_engine::MockEngine;

/// A query the mocks accept; they never decode it.
#[must_use]
pub fn any_query() -> Arc<dyn Query> {
    Arc::new(Call::new(GetTime, ()))
}

/// Issues [`any_query`] with default arguments.
pub async fn query(engine: &dyn LiteEngine) -> Result<AnyResponse, EngineError> {
    engine.query(any_query(), QueryArgs::default()).await
}

/// Name of the mock that answered, from a [`MockEngine`] response.
#[must_use]
pub fn served_by(response: AnyResponse) -> String {
    *response.downcast::<String>().expect("mock engines answer with their name")
}

/// Balancer config that surfaces the first error without retrying or sleeping.
#[must_use]
pub fn fail_fast_balancer() -> LoadBalancerConfig {
    LoadBalancerConfig {
        max_errors_before_throw: 0,
        max_attempts_until_ready: 5,
        retry_delay_ms: 0,
        ..LoadBalancerConfig::default()
    }
}

/// Balancer config with quick retries for tests.
#[must_use]
pub fn quick_balancer() -> LoadBalancerConfig {
    LoadBalancerConfig { retry_delay_ms: 1, ..LoadBalancerConfig::default() }
}

#[must_use]
pub fn priority_config(max_errors: u32, min_available: u32, continuous: bool, ttl_ms: u64) -> PriorityConfig {
    PriorityConfig {
        max_errors_until_suppressed: max_errors,
        min_available_to_unsuppress: min_available,
        require_continuous_availability: continuous,
        err_counter_ttl_ms: ttl_ms,
    }
}

/// Wraps mocks in a balancer tier.
#[must_use]
pub fn tier(engines: &[&Arc<MockEngine>], config: LoadBalancerConfig) -> Arc<LoadBalancingEngine> {
    let engines = engines.iter().map(|e| e.as_engine()).collect();
    Arc::new(LoadBalancingEngine::new(engines, config).expect("mocks are distinct"))
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Runs `future` with a hard deadline so a hung test fails instead of blocking.
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future).await.expect("test step timed out")
}
