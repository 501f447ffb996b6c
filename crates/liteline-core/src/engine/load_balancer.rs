//! Round-robin dispatch over a set of engines with bounded retries.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use super::{EngineError, EngineEvent, EventBus, LiteEngine, QueryArgs};
use crate::schema::{AnyResponse, Query};

type EngineList = Vec<Arc<dyn LiteEngine>>;

/// Tunables for a [`LoadBalancingEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Timeout passed to children when the caller does not set one.
    pub default_timeout_ms: u64,
    /// Errors tolerated within one call before the last one is returned.
    pub max_errors_before_throw: u32,
    /// Not-ready candidates skipped within one call before giving up.
    pub max_attempts_until_ready: u32,
    /// Pause between retries, and after each full rotation without a ready peer.
    pub retry_delay_ms: u64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            max_errors_before_throw: 20,
            max_attempts_until_ready: 100,
            retry_delay_ms: 100,
        }
    }
}

impl LoadBalancerConfig {
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Rotates calls across the children currently reporting ready.
///
/// The ready list is maintained from the children's lifecycle events: `Ready`
/// adds a child, `Close` and `Error` remove it. Readiness of the balancer itself
/// only reflects whether it was closed; use
/// [`check_at_least_one_ready`](Self::check_at_least_one_ready) to probe the
/// children.
pub struct LoadBalancingEngine {
    engines: RwLock<EngineList>,
    ready: Arc<RwLock<EngineList>>,
    counter: Mutex<usize>,
    config: LoadBalancerConfig,
    closed: AtomicBool,
    events: EventBus,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for LoadBalancingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancingEngine")
            .field("engines", &self.engine_count())
            .field("ready", &self.ready_count())
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl LoadBalancingEngine {
    /// Creates a balancer over `engines`. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateEngine`] if the same instance appears twice.
    pub fn new(engines: Vec<Arc<dyn LiteEngine>>, config: LoadBalancerConfig) -> Result<Self, EngineError> {
        let balancer = Self {
            engines: RwLock::new(Vec::with_capacity(engines.len())),
            ready: Arc::new(RwLock::new(Vec::new())),
            counter: Mutex::new(0),
            config,
            closed: AtomicBool::new(false),
            events: EventBus::new(),
            listeners: Mutex::new(Vec::new()),
        };
        for engine in engines {
            balancer.add_engine(engine)?;
        }
        Ok(balancer)
    }

    /// Registers another child.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateEngine`] if `engine` is already registered.
    pub fn add_engine(&self, engine: Arc<dyn LiteEngine>) -> Result<(), EngineError> {
        {
            let mut engines = self.engines.write();
            if engines.iter().any(|e| same_engine(e, &engine)) {
                return Err(EngineError::DuplicateEngine);
            }
            engines.push(engine.clone());
        }

        // subscribe before probing so a Ready in between is not lost
        let listener = spawn_listener(Arc::downgrade(&engine), engine.subscribe(), self.ready.clone());
        self.listeners.lock().push(listener);

        if engine.is_ready() {
            mark_ready(&self.ready, &engine);
        }
        Ok(())
    }

    /// Returns `true` if any child, ready-listed or not, is ready right now.
    #[must_use]
    pub fn check_at_least_one_ready(&self) -> bool {
        self.engines.read().iter().any(|e| e.is_ready())
    }

    #[must_use]
    pub fn engine_count(&self) -> usize {
        self.engines.read().len()
    }

    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.ready.read().len()
    }

    #[must_use]
    pub fn config(&self) -> &LoadBalancerConfig {
        &self.config
    }

    fn next_start(&self) -> usize {
        let len = self.ready.read().len();
        rotate(&mut self.counter.lock(), len)
    }

    fn candidate(&self, index: usize) -> (Option<Arc<dyn LiteEngine>>, usize) {
        let ready = self.ready.read();
        (ready.get(index).cloned(), ready.len())
    }
}

impl Drop for LoadBalancingEngine {
    fn drop(&mut self) {
        for listener in self.listeners.lock().drain(..) {
            listener.abort();
        }
    }
}

#[async_trait]
impl LiteEngine for LoadBalancingEngine {
    async fn query(&self, query: Arc<dyn Query>, args: QueryArgs) -> Result<AnyResponse, EngineError> {
        if self.is_closed() {
            return Err(EngineError::EngineClosed);
        }

        let args = args.or_default_timeout(self.config.default_timeout());
        let max_attempts = self.config.max_attempts_until_ready as usize;
        let mut index = self.next_start();
        let mut attempts = 0usize;
        let mut errors = 0u32;

        loop {
            let (candidate, ready_len) = self.candidate(index);
            let Some(engine) = candidate.filter(|e| e.is_ready()) else {
                index = advance(index, ready_len);
                attempts += 1;

                if attempts >= ready_len {
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                if attempts > max_attempts {
                    warn!(query = query.name(), attempts, "no ready engines");
                    return Err(EngineError::NoEnginesAvailable);
                }
                continue;
            };

            trace!(query = query.name(), index, "dispatching");
            match engine.query(query.clone(), args).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    index = advance(index, self.ready.read().len());
                    errors += 1;

                    if errors > self.config.max_errors_before_throw {
                        warn!(query = query.name(), errors, error = %e, "retry budget exhausted");
                        return Err(e);
                    }
                    debug!(query = query.name(), errors, error = %e, "query failed, trying next engine");
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for engine in self.engines.read().iter() {
            engine.close();
        }
        for listener in self.listeners.lock().drain(..) {
            listener.abort();
        }
        self.ready.write().clear();
        debug!(engines = self.engine_count(), "load balancer closed");
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

/// Picks the starting index for a call and advances the rotation counter.
///
/// The counter wraps back to zero each time it completes a rotation over the
/// current ready list; an empty list always starts at zero.
fn rotate(counter: &mut usize, ready_len: usize) -> usize {
    if ready_len == 0 {
        *counter = counter.wrapping_add(1);
        return 0;
    }
    let index = *counter % ready_len;
    *counter = counter.wrapping_add(1);
    if *counter % ready_len == 0 {
        *counter = 0;
    }
    index
}

fn advance(index: usize, ready_len: usize) -> usize {
    if ready_len == 0 {
        0
    } else {
        (index + 1) % ready_len
    }
}

fn same_engine(a: &Arc<dyn LiteEngine>, b: &Arc<dyn LiteEngine>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn mark_ready(ready: &RwLock<EngineList>, engine: &Arc<dyn LiteEngine>) {
    let mut ready = ready.write();
    if !ready.iter().any(|e| same_engine(e, engine)) {
        ready.push(engine.clone());
    }
}

fn mark_not_ready(ready: &RwLock<EngineList>, engine: &Arc<dyn LiteEngine>) {
    ready.write().retain(|e| !same_engine(e, engine));
}

/// Mirrors one child's lifecycle events into the ready list.
fn spawn_listener(
    engine: Weak<dyn LiteEngine>,
    mut events: broadcast::Receiver<EngineEvent>,
    ready: Arc<RwLock<EngineList>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = events.recv().await;
            let Some(engine) = engine.upgrade() else {
                break;
            };
            match event {
                Ok(EngineEvent::Ready) => mark_ready(&ready, &engine),
                Ok(EngineEvent::Close | EngineEvent::Error(_)) => mark_not_ready(&ready, &engine),
                Ok(EngineEvent::Connect) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "engine events lagged, resyncing readiness");
                    if engine.is_ready() {
                        mark_ready(&ready, &engine);
                    } else {
                        mark_not_ready(&ready, &engine);
                    }
                }
                Err(RecvError::Closed) => {
                    mark_not_ready(&ready, &engine);
                    break;
                }
            }
        }
    })
}
