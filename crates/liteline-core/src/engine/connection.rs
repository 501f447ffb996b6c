//! Single-peer engine over one persistent socket.
//!
//! A supervisor task owns the socket: it connects, performs the handshake,
//! reads answers and reconnects forever after failures. Callers only touch the
//! pending table, which maps each query id to the sender awaiting its answer.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use super::{EngineError, EngineEvent, EventBus, LiteEngine, QueryArgs};
use crate::{
    schema::{AnyResponse, Query},
    tl::envelope::{self, AdnlMessage, AwaitSeqno, QueryId},
    transport::{self, datagram::MAX_PAYLOAD_LEN, FrameReader, FrameWriter, PeerAddress, TransportError},
};

/// Fresh ids drawn for one query before giving up on the id source.
const MAX_ID_DRAWS: usize = 8;

/// Timing options for a [`ConnectionEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Timeout applied when the caller does not pass one.
    pub default_timeout_ms: u64,
    /// Delay before reconnecting after the socket drops. A peer's own
    /// `reconnectTimeout` takes precedence.
    pub reconnect_delay_ms: u64,
    /// How long to wait for the peer to acknowledge the handshake.
    pub handshake_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { default_timeout_ms: 5_000, reconnect_delay_ms: 10_000, handshake_timeout_ms: 5_000 }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Source of query ids. Must produce full-width random values.
///
/// An id that is still in flight on the same engine is redrawn.
pub trait QueryIdSource: Send + Sync {
    fn next_id(&self) -> QueryId;
}

/// Draws query ids from the thread-local CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomQueryIds;

impl QueryIdSource for RandomQueryIds {
    fn next_id(&self) -> QueryId {
        let mut id = [0u8; 32];
        rand::rng().fill_bytes(&mut id);
        id
    }
}

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Ready,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

type Reply = oneshot::Sender<Result<AnyResponse, EngineError>>;

struct PendingQuery {
    query: Arc<dyn Query>,
    /// Encoded message, resent verbatim after every reconnect.
    packet: Bytes,
    reply: Reply,
    /// Registration order, used when flushing.
    seq: u64,
}

/// State shared by callers and the supervisor. Guarded by one lock so that
/// registering a query and flushing on readiness never interleave.
struct Inner {
    state: ConnectionState,
    pending: HashMap<QueryId, PendingQuery>,
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
}

struct Shared {
    peer: PeerAddress,
    config: ConnectionConfig,
    ids: Arc<dyn QueryIdSource>,
    inner: Mutex<Inner>,
    next_seq: AtomicU64,
    closed: AtomicBool,
    events: EventBus,
    shutdown: watch::Sender<bool>,
}

/// Engine bound to a single lite server.
///
/// Construction spawns the connection task and returns immediately. Queries
/// issued before the handshake completes are buffered and flushed once the
/// connection becomes ready.
pub struct ConnectionEngine {
    shared: Arc<Shared>,
    _supervisor: JoinHandle<()>,
}

impl ConnectionEngine {
    /// Starts connecting to `peer`. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(peer: PeerAddress, config: ConnectionConfig) -> Self {
        Self::with_id_source(peer, config, Arc::new(RandomQueryIds))
    }

    #[must_use]
    pub fn with_id_source(
        peer: PeerAddress,
        config: ConnectionConfig,
        ids: Arc<dyn QueryIdSource>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            peer,
            config,
            ids,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                pending: HashMap::new(),
                outbound: None,
            }),
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            events: EventBus::new(),
            shutdown,
        });

        let supervisor = tokio::spawn(supervise(shared.clone(), shutdown_rx));
        Self { shared, _supervisor: supervisor }
    }

    #[must_use]
    pub fn peer(&self) -> &PeerAddress {
        &self.shared.peer
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Number of queries waiting for an answer.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.inner.lock().pending.len()
    }
}

impl Drop for ConnectionEngine {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[async_trait]
impl LiteEngine for ConnectionEngine {
    async fn query(&self, query: Arc<dyn Query>, args: QueryArgs) -> Result<AnyResponse, EngineError> {
        if self.is_closed() {
            return Err(EngineError::EngineClosed);
        }

        let timeout = args.timeout.unwrap_or_else(|| self.shared.config.default_timeout());
        let await_seqno = args.await_seqno.map(|seqno| AwaitSeqno {
            seqno,
            timeout_ms: i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX),
        });

        let request = query.encode();
        let (reply, response) = oneshot::channel();
        let name = query.name();
        let mut entry = PendingQuery { query, packet: Bytes::new(), reply, seq: 0 };

        let mut draws = 0;
        let guard = loop {
            let query_id = self.shared.ids.next_id();
            entry.packet = envelope::encode_query(&query_id, &request, await_seqno)?;
            if entry.packet.len() > MAX_PAYLOAD_LEN {
                return Err(EngineError::RequestTooLarge { len: entry.packet.len(), max: MAX_PAYLOAD_LEN });
            }
            entry.seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);

            match self.shared.register(query_id, entry) {
                Ok(guard) => break guard,
                Err(rejected) => {
                    draws += 1;
                    debug!(peer = %self.shared.peer, query = name, query_id = %hex::encode(&query_id[..8]), "query id already in flight");
                    if draws >= MAX_ID_DRAWS {
                        return Err(EngineError::InvalidConfig(format!(
                            "query id source repeated an in-flight id {draws} times"
                        )));
                    }
                    entry = rejected;
                }
            }
        };
        trace!(peer = %self.shared.peer, query = name, query_id = %hex::encode(&guard.query_id[..8]), "query registered");

        let result = match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => result,
            // the entry can only disappear without a reply if the engine went away
            Ok(Err(_)) => Err(EngineError::EngineClosed),
            Err(_) => {
                debug!(peer = %self.shared.peer, query = name, timeout_ms = timeout.as_millis(), "query timed out");
                Err(EngineError::Timeout)
            }
        };
        drop(guard);
        result
    }

    fn close(&self) {
        self.shared.close();
    }

    fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }
}

/// Removes a pending entry when the caller stops waiting for it.
///
/// If the answer already arrived the entry is gone and this is a no-op.
struct PendingGuard<'a> {
    shared: &'a Shared,
    query_id: QueryId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.take_pending(&self.query_id);
    }
}

impl Shared {
    /// Adds `entry` to the pending table, sending it right away when ready.
    ///
    /// Hands the entry back untouched if `query_id` is already in flight.
    fn register(&self, query_id: QueryId, entry: PendingQuery) -> Result<PendingGuard<'_>, PendingQuery> {
        let mut inner = self.inner.lock();
        if inner.pending.contains_key(&query_id) {
            return Err(entry);
        }
        if inner.state == ConnectionState::Ready {
            if let Some(outbound) = &inner.outbound {
                let _ = outbound.send(entry.packet.clone());
            }
        }
        inner.pending.insert(query_id, entry);
        Ok(PendingGuard { shared: self, query_id })
    }

    fn take_pending(&self, query_id: &QueryId) -> Option<PendingQuery> {
        self.inner.lock().pending.remove(query_id)
    }

    fn set_state(&self, state: ConnectionState) {
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Closed {
            inner.state = state;
        }
    }

    /// Switches to `Ready` and resends every buffered packet in registration order.
    fn mark_ready(&self, outbound: mpsc::UnboundedSender<Bytes>) {
        let flushed = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Closed {
                return;
            }

            let mut buffered: Vec<_> = inner.pending.values().map(|p| (p.seq, p.packet.clone())).collect();
            buffered.sort_unstable_by_key(|(seq, _)| *seq);
            for (_, packet) in &buffered {
                let _ = outbound.send(packet.clone());
            }

            inner.state = ConnectionState::Ready;
            inner.outbound = Some(outbound);
            buffered.len()
        };

        info!(peer = %self.peer, flushed, "connection ready");
        self.events.emit(EngineEvent::Ready);
    }

    /// Drops the write channel. Pending queries stay registered.
    fn mark_disconnected(&self) {
        let mut inner = self.inner.lock();
        inner.outbound = None;
        if inner.state != ConnectionState::Closed {
            inner.state = ConnectionState::Disconnected;
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Closed;
            inner.outbound = None;
        }
        self.shutdown.send_replace(true);
        info!(peer = %self.peer, "connection engine closed");
        self.events.emit(EngineEvent::Close);
    }

    fn reconnect_delay(&self) -> Duration {
        self.peer.reconnect_timeout.unwrap_or_else(|| self.config.reconnect_delay())
    }

    /// One connection attempt, from connect to disconnect.
    async fn session(&self) -> Result<(), TransportError> {
        self.set_state(ConnectionState::Connecting);
        debug!(peer = %self.peer, transport = %self.peer.kind, "connecting");

        let (mut reader, mut writer) = transport::connect(&self.peer).await?;
        self.set_state(ConnectionState::Connected);
        self.events.emit(EngineEvent::Connect);
        debug!(peer = %self.peer, "connected, sending handshake");

        let deadline = self.config.handshake_timeout();
        tokio::time::timeout(deadline, transport::handshake(&self.peer, &mut reader, &mut writer))
            .await
            .map_err(|_| {
                TransportError::Handshake(format!("no acknowledgement within {}ms", deadline.as_millis()))
            })??;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let mut writer_task = tokio::spawn(write_loop(writer, outbound_rx));
        self.mark_ready(outbound);

        let result = tokio::select! {
            result = self.read_loop(&mut reader) => result,
            result = &mut writer_task => result.unwrap_or_else(|e| Err(std::io::Error::other(e).into())),
        };

        self.mark_disconnected();
        writer_task.abort();
        result
    }

    async fn read_loop(&self, reader: &mut FrameReader) -> Result<(), TransportError> {
        while let Some(payload) = reader.next_payload().await? {
            if payload.is_empty() {
                trace!(peer = %self.peer, "keepalive");
                continue;
            }
            self.dispatch(&payload);
        }
        Ok(())
    }

    fn dispatch(&self, payload: &[u8]) {
        let (query_id, answer) = match AdnlMessage::decode(payload) {
            Ok(AdnlMessage::Answer { query_id, answer }) => (query_id, answer),
            Ok(AdnlMessage::Query { .. }) => {
                debug!(peer = %self.peer, "ignoring inbound query");
                return;
            }
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "dropping undecodable message");
                return;
            }
        };

        let Some(entry) = self.take_pending(&query_id) else {
            debug!(peer = %self.peer, query_id = %hex::encode(&query_id[..8]), "dropping unmatched answer");
            return;
        };

        let result = if envelope::is_error_payload(&answer) {
            match envelope::decode_error(&answer) {
                Ok((code, message)) => {
                    debug!(peer = %self.peer, query = entry.query.name(), code, %message, "remote error");
                    Err(EngineError::Remote { code, message })
                }
                Err(e) => Err(e.into()),
            }
        } else {
            entry.query.decode(&answer).map_err(|e| {
                warn!(peer = %self.peer, query = entry.query.name(), error = %e, "failed to decode answer");
                EngineError::from(e)
            })
        };

        // the caller may have given up in the meantime
        let _ = entry.reply.send(result);
    }
}

async fn write_loop(
    mut writer: FrameWriter,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) -> Result<(), TransportError> {
    while let Some(packet) = outbound.recv().await {
        writer.send_payload(&packet).await?;
    }
    writer.shutdown().await;
    Ok(())
}

/// Connects, serves and reconnects until the engine is closed.
async fn supervise(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if shared.closed.load(Ordering::Acquire) {
            break;
        }

        let result = tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => break,
            result = shared.session() => result,
        };
        shared.mark_disconnected();

        if shared.closed.load(Ordering::Acquire) {
            break;
        }

        let delay = shared.reconnect_delay();
        match result {
            Ok(()) => {
                info!(peer = %shared.peer, reconnect_in_ms = delay.as_millis(), "connection closed by peer");
                shared.events.emit(EngineEvent::Close);
            }
            Err(e) => {
                warn!(peer = %shared.peer, error = %e, reconnect_in_ms = delay.as_millis(), "connection failed");
                shared.events.emit(EngineEvent::Error(e.to_string()));
            }
        }

        tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => break,
            () = tokio::time::sleep(delay) => {}
        }
    }
    debug!(peer = %shared.peer, "connection supervisor stopped");
}
