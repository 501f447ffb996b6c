//! Typed lite server functions.
//!
//! The application RPC catalog lives outside this crate; anything implementing
//! [`LiteFunction`] can be sent through an engine. Two reference functions are
//! provided in [`functions`] for probing peers.

pub mod functions;

use std::any::Any;

use bytes::Bytes;

use crate::tl::{TlError, TlReader, TlWriter};

pub use functions::{BlockIdExt, GetMasterchainInfo, GetTime, MasterchainInfo, ZeroStateIdExt};

/// A request/response pair with a binary TL schema.
pub trait LiteFunction: Send + Sync + 'static {
    type Request: Send + Sync + 'static;
    type Response: Send + 'static;

    /// TL name, used in logs.
    fn name(&self) -> &'static str;

    /// Appends the boxed request to `writer`.
    fn encode_request(&self, request: &Self::Request, writer: &mut TlWriter);

    /// Decodes the boxed response.
    fn decode_response(&self, reader: &mut TlReader<'_>) -> Result<Self::Response, TlError>;
}

/// Type-erased response produced by [`Query::decode`].
pub type AnyResponse = Box<dyn Any + Send>;

/// Object-safe form of a function call, shared by every engine layer.
///
/// Each call is encoded once and may be retried against several peers, so the
/// query must be able to decode any number of answers.
pub trait Query: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self) -> Bytes;

    fn decode(&self, answer: &[u8]) -> Result<AnyResponse, TlError>;
}

/// A [`LiteFunction`] bound to a concrete request value.
pub struct Call<F: LiteFunction> {
    function: F,
    request: F::Request,
}

impl<F: LiteFunction> Call<F> {
    #[must_use]
    pub fn new(function: F, request: F::Request) -> Self {
        Self { function, request }
    }
}

impl<F: LiteFunction> Query for Call<F> {
    fn name(&self) -> &'static str {
        self.function.name()
    }

    fn encode(&self) -> Bytes {
        let mut writer = TlWriter::new();
        self.function.encode_request(&self.request, &mut writer);
        writer.build()
    }

    fn decode(&self, answer: &[u8]) -> Result<AnyResponse, TlError> {
        let mut reader = TlReader::new(answer);
        let response = self.function.decode_response(&mut reader)?;
        Ok(Box::new(response))
    }
}
