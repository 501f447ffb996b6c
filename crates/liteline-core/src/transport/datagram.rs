//! Checksummed datagram framing shared by both transports.
//!
//! Wire format:
//!
//! ```text
//! [u32 LE length] [32-byte nonce] [payload] [SHA-256(nonce || payload)]
//! ```
//!
//! `length` counts everything after itself, so it is always at least 64.

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::TransportError;

pub const NONCE_LEN: usize = 32;
pub const CHECKSUM_LEN: usize = 32;
pub const MIN_DATAGRAM_LEN: usize = NONCE_LEN + CHECKSUM_LEN;

/// Upper bound on a single datagram to prevent unbounded allocation.
pub const MAX_DATAGRAM_LEN: usize = 16 * 1024 * 1024;

/// Largest payload that still fits in a datagram of [`MAX_DATAGRAM_LEN`].
pub const MAX_PAYLOAD_LEN: usize = MAX_DATAGRAM_LEN - NONCE_LEN - CHECKSUM_LEN;

/// Frames `payload` with a fresh random nonce and checksum.
#[must_use]
pub fn encode(payload: &[u8]) -> Bytes {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);
    encode_with_nonce(&nonce, payload)
}

fn encode_with_nonce(nonce: &[u8; NONCE_LEN], payload: &[u8]) -> Bytes {
    let body_len = NONCE_LEN + payload.len() + CHECKSUM_LEN;
    let checksum = Sha256::new().chain_update(nonce).chain_update(payload).finalize();

    let mut buf = BytesMut::with_capacity(4 + body_len);
    buf.put_u32_le(body_len as u32);
    buf.put_slice(nonce);
    buf.put_slice(payload);
    buf.put_slice(&checksum);
    buf.freeze()
}

/// Validates a datagram length prefix.
pub fn check_len(len: usize) -> Result<(), TransportError> {
    if len < MIN_DATAGRAM_LEN {
        return Err(TransportError::Malformed(format!(
            "datagram too short: {len} bytes (min {MIN_DATAGRAM_LEN})"
        )));
    }
    if len > MAX_DATAGRAM_LEN {
        return Err(TransportError::Malformed(format!(
            "datagram too large: {len} bytes (max {MAX_DATAGRAM_LEN})"
        )));
    }
    Ok(())
}

/// Verifies and strips the body of a datagram (everything after the length prefix).
pub fn decode_body(body: &[u8]) -> Result<Bytes, TransportError> {
    check_len(body.len())?;

    let (nonce, rest) = body.split_at(NONCE_LEN);
    let (payload, checksum) = rest.split_at(rest.len() - CHECKSUM_LEN);
    let expected = Sha256::new().chain_update(nonce).chain_update(payload).finalize();
    if expected.as_slice() != checksum {
        return Err(TransportError::Malformed("datagram checksum mismatch".to_string()));
    }

    Ok(Bytes::copy_from_slice(payload))
}

/// Decodes a complete datagram including its length prefix.
pub fn decode(frame: &[u8]) -> Result<Bytes, TransportError> {
    if frame.len() < 4 {
        return Err(TransportError::Malformed("datagram missing length prefix".to_string()));
    }
    let (len, body) = frame.split_at(4);
    let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if len != body.len() {
        return Err(TransportError::Malformed(format!(
            "datagram length mismatch: header says {len}, got {}",
            body.len()
        )));
    }
    decode_body(body)
}
