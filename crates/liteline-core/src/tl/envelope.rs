//! Lite server query envelope.
//!
//! A caller's request travels through three layers before hitting the socket:
//!
//! ```text
//! adnl.message.query { query_id, query: liteServer.query { data: [waitMasterchainSeqno] ++ request } }
//! ```
//!
//! and comes back as `adnl.message.answer { query_id, answer }`, where `answer` is
//! either the function's response or a `liteServer.error`.

use bytes::Bytes;

use super::{TlError, TlReader, TlWriter};

pub const ADNL_MESSAGE_QUERY: u32 = 0xb48b_f97a;
pub const ADNL_MESSAGE_ANSWER: u32 = 0x0fac_8416;
pub const LITE_SERVER_QUERY: u32 = 0x798c_06df;
pub const LITE_SERVER_WAIT_MASTERCHAIN_SEQNO: u32 = 0xbaea_b892;
pub const LITE_SERVER_ERROR: u32 = 0xbba9_e148;
pub const PUB_ED25519: u32 = 0x4813_b4c6;

/// `liteServer.error` read as a signed little-endian int, as it appears on the wire.
pub const ERROR_SENTINEL: i32 = LITE_SERVER_ERROR as i32;

/// 256-bit random identifier binding an answer to its query.
pub type QueryId = [u8; 32];

/// Optional "wait until the masterchain reaches `seqno`" gate prepended to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwaitSeqno {
    pub seqno: u32,
    pub timeout_ms: i32,
}

/// Wraps an encoded request body in `liteServer.query` and `adnl.message.query`.
///
/// `request` is the caller's already-encoded function call; the optional
/// `await_seqno` gate is placed in front of it inside the same `data` field.
///
/// # Errors
///
/// Returns [`TlError::ValueTooLong`] if the wrapped request does not fit in a
/// TL `bytes` field.
pub fn encode_query(
    query_id: &QueryId,
    request: &[u8],
    await_seqno: Option<AwaitSeqno>,
) -> Result<Bytes, TlError> {
    let mut body = TlWriter::new();
    if let Some(gate) = await_seqno {
        body.write_u32(LITE_SERVER_WAIT_MASTERCHAIN_SEQNO);
        // TL `int`: the seqno is carried as a signed 32-bit value
        body.write_i32(gate.seqno as i32);
        body.write_i32(gate.timeout_ms);
    }
    body.write_raw(request);
    let body = body.build();

    let mut lite_query = TlWriter::new();
    lite_query.write_u32(LITE_SERVER_QUERY);
    lite_query.try_write_bytes(&body)?;
    let lite_query = lite_query.build();

    let mut message = TlWriter::new();
    message.write_u32(ADNL_MESSAGE_QUERY);
    message.write_int256(query_id);
    message.try_write_bytes(&lite_query)?;
    Ok(message.build())
}

/// Encodes an answer message. Used by peers and test servers.
#[must_use]
pub fn encode_answer(query_id: &QueryId, answer: &[u8]) -> Bytes {
    let mut message = TlWriter::new();
    message.write_u32(ADNL_MESSAGE_ANSWER);
    message.write_int256(query_id);
    message.write_bytes(answer);
    message.build()
}

/// Encodes a `liteServer.error` payload.
#[must_use]
pub fn encode_error(code: i32, message: &str) -> Bytes {
    let mut writer = TlWriter::new();
    writer.write_u32(LITE_SERVER_ERROR);
    writer.write_i32(code);
    writer.write_string(message);
    writer.build()
}

/// A decoded `adnl.Message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdnlMessage {
    Query { query_id: QueryId, query: Bytes },
    Answer { query_id: QueryId, answer: Bytes },
}

impl AdnlMessage {
    pub fn decode(data: &[u8]) -> Result<Self, TlError> {
        let mut reader = TlReader::new(data);
        let message = match reader.read_u32()? {
            ADNL_MESSAGE_QUERY => {
                let query_id = reader.read_int256()?;
                let query = Bytes::copy_from_slice(reader.read_bytes()?);
                Self::Query { query_id, query }
            }
            ADNL_MESSAGE_ANSWER => {
                let query_id = reader.read_int256()?;
                let answer = Bytes::copy_from_slice(reader.read_bytes()?);
                Self::Answer { query_id, answer }
            }
            other => return Err(TlError::UnknownConstructor(other)),
        };
        reader.finish()?;
        Ok(message)
    }
}

/// The inside of a `liteServer.query`, as seen by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteQuery {
    pub await_seqno: Option<AwaitSeqno>,
    pub request: Bytes,
}

impl LiteQuery {
    /// Splits the `query` field of an `adnl.message.query` into its gate and request.
    pub fn decode(query: &[u8]) -> Result<Self, TlError> {
        let mut reader = TlReader::new(query);
        reader.expect_constructor(LITE_SERVER_QUERY)?;
        let data = reader.read_bytes()?;
        reader.finish()?;

        let mut inner = TlReader::new(data);
        let await_seqno = if data.len() >= 12 && peek_u32(data) == LITE_SERVER_WAIT_MASTERCHAIN_SEQNO
        {
            inner.read_u32()?;
            let seqno = inner.read_i32()? as u32;
            let timeout_ms = inner.read_i32()?;
            Some(AwaitSeqno { seqno, timeout_ms })
        } else {
            None
        };
        let offset = data.len() - inner.remaining();
        Ok(Self { await_seqno, request: Bytes::copy_from_slice(&data[offset..]) })
    }
}

/// Returns `true` if an answer payload carries the `liteServer.error` tag.
#[must_use]
pub fn is_error_payload(answer: &[u8]) -> bool {
    answer.len() >= 4 && i32::from_le_bytes([answer[0], answer[1], answer[2], answer[3]]) == ERROR_SENTINEL
}

/// Decodes a `liteServer.error` payload into `(code, message)`.
pub fn decode_error(answer: &[u8]) -> Result<(i32, String), TlError> {
    let mut reader = TlReader::new(answer);
    reader.expect_constructor(LITE_SERVER_ERROR)?;
    let code = reader.read_i32()?;
    let message = reader.read_string()?;
    Ok((code, message))
}

fn peek_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}
