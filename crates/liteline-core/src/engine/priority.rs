//! Ordered-tier failover with per-tier suppression.
//!
//! Calls go to the first tier that is not suppressed. A tier that keeps failing
//! inside one error window is suppressed; a suppressed tier is probed on every
//! call and comes back after enough ready probes. The last tier is never
//! suppressed, so there is always somewhere to send a call.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info, warn};

use super::{EngineError, EngineEvent, EventBus, LiteEngine, LoadBalancingEngine, QueryArgs};
use crate::schema::{AnyResponse, Query};

/// Callback receiving human-readable tier transitions, in addition to `tracing`.
pub type DebugSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Suppression tunables for a [`PriorityGroupEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    /// Errors within one window that suppress a tier.
    pub max_errors_until_suppressed: u32,
    /// Ready probes needed to bring a suppressed tier back.
    pub min_available_to_unsuppress: u32,
    /// When set, a single failed probe erases a suppressed tier's progress.
    pub require_continuous_availability: bool,
    /// Length of the error window.
    pub err_counter_ttl_ms: u64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            max_errors_until_suppressed: 10,
            min_available_to_unsuppress: 8,
            require_continuous_availability: false,
            err_counter_ttl_ms: 60_000,
        }
    }
}

impl PriorityConfig {
    #[must_use]
    pub fn err_counter_ttl(&self) -> Duration {
        Duration::from_millis(self.err_counter_ttl_ms)
    }
}

/// Result of probing a suppressed tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Unchanged,
    Progress(u32),
    Reset,
    Unsuppressed,
}

/// Result of recording a failed call on a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureOutcome {
    /// Another call suppressed the tier first; nothing was recorded.
    AlreadySuppressed,
    Counted { errors: u32, window_reset: bool },
    Suppressed { errors: u32, window_reset: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TierState {
    suppressed: bool,
    err_counter: u32,
    available_counter: u32,
    first_err: Option<Instant>,
}

impl TierState {
    fn reset(&mut self, suppressed: bool) {
        *self = Self { suppressed, ..Self::default() };
    }

    fn observe_probe(&mut self, ready: bool, config: &PriorityConfig) -> ProbeOutcome {
        let outcome = if ready {
            self.available_counter += 1;
            ProbeOutcome::Progress(self.available_counter)
        } else if config.require_continuous_availability {
            self.available_counter = 0;
            ProbeOutcome::Reset
        } else {
            ProbeOutcome::Unchanged
        };

        if self.available_counter >= config.min_available_to_unsuppress {
            self.reset(false);
            return ProbeOutcome::Unsuppressed;
        }
        outcome
    }

    /// `call_started` is when the failed call entered the engine; `now` is when it failed.
    fn record_failure(&mut self, call_started: Instant, now: Instant, config: &PriorityConfig) -> FailureOutcome {
        if self.suppressed {
            return FailureOutcome::AlreadySuppressed;
        }

        let first_err = *self.first_err.get_or_insert(now);
        let window_reset = call_started.saturating_duration_since(first_err) >= config.err_counter_ttl();
        if window_reset {
            self.err_counter = 0;
            self.first_err = Some(now);
        }

        self.err_counter += 1;
        let errors = self.err_counter;
        if errors >= config.max_errors_until_suppressed {
            self.reset(true);
            return FailureOutcome::Suppressed { errors, window_reset };
        }
        FailureOutcome::Counted { errors, window_reset }
    }
}

struct Tier {
    engine: Arc<LoadBalancingEngine>,
    state: Mutex<TierState>,
}

/// Routes calls to the highest-priority healthy tier.
pub struct PriorityGroupEngine {
    tiers: Vec<Tier>,
    config: PriorityConfig,
    debug_sink: Option<DebugSink>,
    closed: AtomicBool,
    events: EventBus,
}

impl fmt::Debug for PriorityGroupEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityGroupEngine")
            .field("tiers", &self.tiers.len())
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PriorityGroupEngine {
    /// Creates the engine over `tiers`, highest priority first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if fewer than two tiers are given.
    pub fn new(tiers: Vec<Arc<LoadBalancingEngine>>, config: PriorityConfig) -> Result<Self, EngineError> {
        if tiers.len() < 2 {
            return Err(EngineError::InvalidConfig(format!(
                "priority engine needs at least 2 tiers, got {}",
                tiers.len()
            )));
        }

        Ok(Self {
            tiers: tiers
                .into_iter()
                .map(|engine| Tier { engine, state: Mutex::new(TierState::default()) })
                .collect(),
            config,
            debug_sink: None,
            closed: AtomicBool::new(false),
            events: EventBus::new(),
        })
    }

    #[must_use]
    pub fn with_debug_sink(mut self, sink: DebugSink) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    #[must_use]
    pub fn tier(&self, index: usize) -> Option<&Arc<LoadBalancingEngine>> {
        self.tiers.get(index).map(|t| &t.engine)
    }

    /// Returns whether the tier at `index` is currently suppressed.
    #[must_use]
    pub fn is_suppressed(&self, index: usize) -> bool {
        self.tiers.get(index).is_some_and(|t| t.state.lock().suppressed)
    }

    /// Probes every suppressed tier and lifts suppression where earned.
    fn recovery_scan(&self) {
        for (index, tier) in self.tiers.iter().enumerate() {
            if !tier.state.lock().suppressed {
                continue;
            }

            // probe outside the lock
            let ready = tier.engine.check_at_least_one_ready();
            let outcome = {
                let mut state = tier.state.lock();
                if !state.suppressed {
                    continue;
                }
                state.observe_probe(ready, &self.config)
            };

            match outcome {
                ProbeOutcome::Progress(count) => {
                    self.debug(&format!("suppressed tier {index} signaled ready ({count}/{})", self.config.min_available_to_unsuppress));
                }
                ProbeOutcome::Reset => {
                    self.debug(&format!("suppressed tier {index} not ready, availability counter reset"));
                }
                ProbeOutcome::Unsuppressed => {
                    info!(tier = index, "tier unsuppressed");
                    self.debug(&format!("suppressed tier {index} was unsuppressed"));
                }
                ProbeOutcome::Unchanged => {}
            }
        }
    }

    fn select_tier(&self) -> usize {
        let last = self.tiers.len() - 1;
        self.tiers[..last]
            .iter()
            .position(|t| !t.state.lock().suppressed)
            .unwrap_or(last)
    }

    fn record_failure(&self, index: usize, call_started: Instant) {
        let outcome = self.tiers[index].state.lock().record_failure(call_started, Instant::now(), &self.config);

        match outcome {
            FailureOutcome::AlreadySuppressed => {}
            FailureOutcome::Counted { errors, window_reset } => {
                if window_reset {
                    self.debug(&format!("tier {index} error counter was reset due to ttl"));
                }
                debug!(tier = index, errors, "tier error recorded");
            }
            FailureOutcome::Suppressed { errors, window_reset } => {
                if window_reset {
                    self.debug(&format!("tier {index} error counter was reset due to ttl"));
                }
                warn!(tier = index, errors, "tier suppressed");
                self.debug(&format!("tier {index} was suppressed, accumulated errors = {errors}"));
            }
        }
    }

    fn debug(&self, message: &str) {
        debug!("{message}");
        if let Some(sink) = &self.debug_sink {
            sink(message);
        }
    }
}

#[async_trait]
impl LiteEngine for PriorityGroupEngine {
    async fn query(&self, query: Arc<dyn Query>, args: QueryArgs) -> Result<AnyResponse, EngineError> {
        if self.is_closed() {
            return Err(EngineError::EngineClosed);
        }

        let call_started = Instant::now();
        self.recovery_scan();

        let index = self.select_tier();
        match self.tiers[index].engine.query(query, args).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if index + 1 < self.tiers.len() {
                    self.record_failure(index, call_started);
                }
                Err(e)
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for tier in &self.tiers {
            tier.engine.close();
        }
        debug!(tiers = self.tiers.len(), "priority engine closed");
        self.events.emit(EngineEvent::Close);
    }

    fn is_ready(&self) -> bool {
        !self.is_closed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
