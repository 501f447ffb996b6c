use thiserror::Error;

use crate::{tl::TlError, transport::TransportError};

/// Failure of a single call through any engine layer.
///
/// Every layer surfaces the same error type so a caller at the top of the
/// hierarchy sees exactly what the leaf produced, unless the balancer gave up
/// looking for a ready peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine was explicitly closed. No I/O was attempted.
    #[error("engine is closed")]
    EngineClosed,

    /// No answer arrived within the per-call deadline.
    #[error("query timed out")]
    Timeout,

    /// A balancing engine exhausted its search budget for a ready peer.
    #[error("no engines available")]
    NoEnginesAvailable,

    /// The peer answered with `liteServer.error`.
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },

    /// The answer did not match the response schema.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The connection failed while the call was outstanding.
    #[error("transport error: {0}")]
    Transport(String),

    /// The encoded request cannot be framed. Nothing was sent.
    #[error("request of {len} bytes exceeds the {max} byte limit")]
    RequestTooLarge { len: usize, max: usize },

    /// The same engine instance was registered twice.
    #[error("engine is already registered")]
    DuplicateEngine,

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Returns `true` for errors reported by the remote peer itself.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<TlError> for EngineError {
    fn from(e: TlError) -> Self {
        match e {
            TlError::ValueTooLong { len, max } => Self::RequestTooLarge { len, max },
            other => Self::Decode(other.to_string()),
        }
    }
}

impl From<TransportError> for EngineError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e.to_string())
    }
}
