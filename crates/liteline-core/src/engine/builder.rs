//! Builder assembling the full engine hierarchy from peer groups.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::{
    ConnectionConfig, ConnectionEngine, DebugSink, EngineError, LiteEngine, LoadBalancerConfig,
    LoadBalancingEngine, PriorityConfig, PriorityGroupEngine,
};
use crate::{config::AppConfig, transport::PeerAddress};

/// Errors that can occur while assembling the engine hierarchy.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// Failover needs somewhere to fail over to.
    #[error("at least 2 peer groups are required, got {0}")]
    TooFewGroups(usize),

    #[error("peer group {0} has no peers")]
    EmptyGroup(usize),

    /// A peer URL in the configuration did not parse.
    #[error("invalid peer configuration: {0}")]
    InvalidPeer(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Builder for a [`PriorityGroupEngine`] over one [`LoadBalancingEngine`] per
/// peer group, each balancing over one [`ConnectionEngine`] per peer.
///
/// # Examples
///
/// ```no_run
/// # use liteline_core::engine::EngineGroupBuilder;
/// # use liteline_core::transport::PeerAddress;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let own: PeerAddress = "tcp://10.0.0.5:4924?publicKey=n4VDnSCUuSpjnCyUk9e3QOOd6o0ItSWYbTnW3Wnn8wk=".parse()?;
/// let fallback: PeerAddress = "tcp://10.0.0.6:4924?publicKey=n4VDnSCUuSpjnCyUk9e3QOOd6o0ItSWYbTnW3Wnn8wk=".parse()?;
///
/// let engine = EngineGroupBuilder::new()
///     .group(vec![own])
///     .group(vec![fallback])
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct EngineGroupBuilder {
    groups: Vec<Vec<PeerAddress>>,
    connection: ConnectionConfig,
    balancer: LoadBalancerConfig,
    priority: PriorityConfig,
    debug_sink: Option<DebugSink>,
}

impl EngineGroupBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes groups and tunables from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::InvalidPeer`] if a configured peer URL does not parse.
    pub fn from_config(config: &AppConfig) -> Result<Self, BuilderError> {
        let groups = config.peer_groups().map_err(BuilderError::InvalidPeer)?;
        Ok(Self {
            groups,
            connection: config.connection.clone(),
            balancer: config.balancer.clone(),
            priority: config.priority.clone(),
            debug_sink: None,
        })
    }

    /// Appends a group with lower priority than every group added so far.
    #[must_use]
    pub fn group(mut self, peers: Vec<PeerAddress>) -> Self {
        self.groups.push(peers);
        self
    }

    #[must_use]
    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    #[must_use]
    pub fn balancer_config(mut self, config: LoadBalancerConfig) -> Self {
        self.balancer = config;
        self
    }

    #[must_use]
    pub fn priority_config(mut self, config: PriorityConfig) -> Self {
        self.priority = config;
        self
    }

    #[must_use]
    pub fn debug_sink(mut self, sink: DebugSink) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    /// Starts every connection and wires the hierarchy together.
    ///
    /// Must be called inside a Tokio runtime. Connections are established in the
    /// background; the returned engine buffers calls until peers become ready.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::TooFewGroups`] or [`BuilderError::EmptyGroup`] for an
    /// unusable group layout.
    pub fn build(self) -> Result<PriorityGroupEngine, BuilderError> {
        if self.groups.len() < 2 {
            return Err(BuilderError::TooFewGroups(self.groups.len()));
        }
        if let Some(index) = self.groups.iter().position(Vec::is_empty) {
            return Err(BuilderError::EmptyGroup(index));
        }

        let mut tiers = Vec::with_capacity(self.groups.len());
        for (index, peers) in self.groups.into_iter().enumerate() {
            info!(group = index, peers = peers.len(), "starting peer group");
            let engines = peers
                .into_iter()
                .map(|peer| {
                    Arc::new(ConnectionEngine::new(peer, self.connection.clone())) as Arc<dyn LiteEngine>
                })
                .collect();
            tiers.push(Arc::new(LoadBalancingEngine::new(engines, self.balancer.clone())?));
        }

        let engine = PriorityGroupEngine::new(tiers, self.priority)?;
        Ok(match self.debug_sink {
            Some(sink) => engine.with_debug_sink(sink),
            None => engine,
        })
    }
}
