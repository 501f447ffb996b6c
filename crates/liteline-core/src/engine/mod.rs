//! The engine hierarchy.
//!
//! Every layer implements [`LiteEngine`], so a [`PriorityGroupEngine`] over
//! [`LoadBalancingEngine`]s over [`ConnectionEngine`]s looks exactly like a single
//! connection to its caller:
//!
//! ```text
//! PriorityGroupEngine ── tier 0: LoadBalancingEngine ── ConnectionEngine (peer a)
//!                     │                              └─ ConnectionEngine (peer b)
//!                     └─ tier 1: LoadBalancingEngine ── ConnectionEngine (peer c)
//! ```
//!
//! Lifecycle changes are published on a broadcast channel per engine; parents
//! subscribe to their children instead of polling them.

pub mod builder;
pub mod connection;
pub mod errors;
pub mod load_balancer;
pub mod priority;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::schema::{AnyResponse, Call, LiteFunction, Query};

pub use builder::{BuilderError, EngineGroupBuilder};
pub use connection::{ConnectionConfig, ConnectionEngine, ConnectionState, QueryIdSource, RandomQueryIds};
pub use errors::EngineError;
pub use load_balancer::{LoadBalancerConfig, LoadBalancingEngine};
pub use priority::{DebugSink, PriorityConfig, PriorityGroupEngine};

/// Capacity of each engine's lifecycle channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle notification published by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The socket is open; the handshake has not completed yet. Leaf engines only.
    Connect,
    /// The engine accepts queries.
    Ready,
    /// The engine stopped accepting queries: the peer hung up or `close` was called.
    Close,
    /// The connection failed with the given reason.
    Error(String),
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryArgs {
    /// Overrides the engine's default timeout.
    pub timeout: Option<Duration>,
    /// Asks the peer to wait until the masterchain reaches this seqno before answering.
    pub await_seqno: Option<u32>,
}

impl QueryArgs {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_await_seqno(mut self, seqno: u32) -> Self {
        self.await_seqno = Some(seqno);
        self
    }

    /// Fills in `timeout` from `default` unless the caller set one.
    #[must_use]
    pub fn or_default_timeout(mut self, default: Duration) -> Self {
        self.timeout = Some(self.timeout.unwrap_or(default));
        self
    }
}

/// The capability shared by every engine layer.
#[async_trait]
pub trait LiteEngine: Send + Sync {
    /// Sends `query` and waits for its decoded answer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EngineClosed`] without doing any I/O if the engine
    /// was closed, otherwise whatever the layer below produced.
    async fn query(&self, query: Arc<dyn Query>, args: QueryArgs) -> Result<AnyResponse, EngineError>;

    /// Closes the engine and everything it owns.
    fn close(&self);

    fn is_ready(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// Subscribes to lifecycle events published from now on.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}

/// Typed calls on top of [`LiteEngine::query`].
#[async_trait]
pub trait LiteEngineExt: LiteEngine {
    /// Encodes `request` for `function`, sends it and returns the typed response.
    ///
    /// # Errors
    ///
    /// See [`LiteEngine::query`].
    async fn call<F: LiteFunction>(
        &self,
        function: F,
        request: F::Request,
        args: QueryArgs,
    ) -> Result<F::Response, EngineError> {
        let name = function.name();
        let response = self.query(Arc::new(Call::new(function, request)), args).await?;
        response
            .downcast::<F::Response>()
            .map(|response| *response)
            .map_err(|_| EngineError::Decode(format!("unexpected response type for {name}")))
    }
}

impl<T: LiteEngine + ?Sized> LiteEngineExt for T {}

/// Sending half of an engine's lifecycle channel.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
