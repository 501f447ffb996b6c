//! Peer address parsing.
//!
//! Peers are written as URLs carrying the remote public key:
//!
//! ```text
//! tcp://1.2.3.4:4924?publicKey=<base64 32 bytes>&reconnectTimeout=5000
//! ws://lite.example.org:443?publicKey=<base64 32 bytes>
//! ```

use std::{fmt, str::FromStr, time::Duration};

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::tl::envelope::PUB_ED25519;

/// Errors produced while parsing a peer URL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerAddressError {
    #[error("invalid peer url: {0}")]
    InvalidUrl(String),

    #[error("unsupported transport scheme: {0}")]
    UnsupportedScheme(String),

    #[error("peer url is missing a host")]
    MissingHost,

    #[error("peer url is missing a port")]
    MissingPort,

    #[error("peer url is missing the publicKey parameter")]
    MissingPublicKey,

    #[error("invalid publicKey: {0}")]
    InvalidPublicKey(String),

    #[error("invalid reconnectTimeout: {0}")]
    InvalidReconnectTimeout(String),
}

/// Socket flavour used to reach a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Datagrams written back-to-back on a TCP stream.
    Tcp,
    /// One datagram per binary WebSocket message.
    Ws,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Ws => f.write_str("ws"),
        }
    }
}

/// A remote lite server: where it lives and which key it presents.
#[derive(Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub kind: TransportKind,
    pub host: String,
    pub port: u16,
    /// Use `wss://` instead of `ws://` for the message-socket transport.
    pub secure: bool,
    pub public_key: [u8; 32],
    /// Per-peer override of the reconnect delay.
    pub reconnect_timeout: Option<Duration>,
}

impl PeerAddress {
    #[must_use]
    pub fn new(kind: TransportKind, host: impl Into<String>, port: u16, public_key: [u8; 32]) -> Self {
        Self { kind, host: host.into(), port, secure: false, public_key, reconnect_timeout: None }
    }

    #[must_use]
    pub fn with_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout = Some(timeout);
        self
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// WebSocket URL for the message-socket transport.
    #[must_use]
    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Identifier of the peer's key: `SHA-256` over the boxed `pub.ed25519` key.
    #[must_use]
    pub fn key_id(&self) -> [u8; 32] {
        Sha256::new()
            .chain_update(PUB_ED25519.to_le_bytes())
            .chain_update(self.public_key)
            .finalize()
            .into()
    }
}

// Keys are long and uninteresting in logs; show a short prefix instead.
impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerAddress")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("public_key", &hex::encode(&self.public_key[..4]))
            .field("reconnect_timeout", &self.reconnect_timeout)
            .finish()
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match (self.kind, self.secure) {
            (TransportKind::Tcp, _) => "tcp",
            (TransportKind::Ws, false) => "ws",
            (TransportKind::Ws, true) => "wss",
        };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddress {
    type Err = PeerAddressError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let sanitized: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let url = Url::parse(&sanitized).map_err(|e| PeerAddressError::InvalidUrl(e.to_string()))?;

        let (kind, secure) = match url.scheme() {
            "tcp" => (TransportKind::Tcp, false),
            "ws" => (TransportKind::Ws, false),
            "wss" => (TransportKind::Ws, true),
            other => return Err(PeerAddressError::UnsupportedScheme(other.to_string())),
        };

        let host = url.host_str().filter(|h| !h.is_empty()).ok_or(PeerAddressError::MissingHost)?;
        let port = url.port_or_known_default().ok_or(PeerAddressError::MissingPort)?;

        let mut public_key = None;
        let mut reconnect_timeout = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "publicKey" => public_key = Some(decode_public_key(&value)?),
                "reconnectTimeout" => {
                    let ms = value
                        .parse::<u64>()
                        .map_err(|_| PeerAddressError::InvalidReconnectTimeout(value.to_string()))?;
                    reconnect_timeout = Some(Duration::from_millis(ms));
                }
                _ => {}
            }
        }

        Ok(Self {
            kind,
            host: host.to_string(),
            port,
            secure,
            public_key: public_key.ok_or(PeerAddressError::MissingPublicKey)?,
            reconnect_timeout,
        })
    }
}

fn decode_public_key(value: &str) -> Result<[u8; 32], PeerAddressError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| PeerAddressError::InvalidPublicKey(e.to_string()))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| PeerAddressError::InvalidPublicKey(format!("expected 32 bytes, got {}", bytes.len())))
}
