//! Minimal TL (Type Language) binary codec.
//!
//! Only the primitives needed by the lite server envelope are implemented:
//! little-endian `int`/`long`, raw `int256`, and length-prefixed `bytes`/`string`
//! padded to a 4-byte boundary. Application schemas build on top of
//! [`TlWriter`] and [`TlReader`] through [`crate::schema::LiteFunction`].

pub mod envelope;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Length at which `bytes` switch from a 1-byte to a 4-byte length prefix.
const LONG_BYTES_MARKER: u8 = 0xfe;

/// Largest payload representable with the 3-byte long form.
const MAX_BYTES_LEN: usize = 0x00ff_ffff;

/// Errors raised while decoding TL data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TlError {
    /// Input ended before the value was complete.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A boxed value carried a constructor id other than the expected one.
    #[error("unexpected constructor 0x{found:08x}, expected 0x{expected:08x}")]
    UnexpectedConstructor { expected: u32, found: u32 },

    /// A boxed value carried a constructor id not known to the decoder.
    #[error("unknown constructor 0x{0:08x}")]
    UnknownConstructor(u32),

    /// A `string` field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// Decoding finished with unread input left over.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// A value is larger than its encoding can carry.
    #[error("value of {len} bytes exceeds the {max} byte limit")]
    ValueTooLong { len: usize, max: usize },
}

/// Append-only TL encoder.
#[derive(Debug, Default)]
pub struct TlWriter {
    buf: BytesMut,
}

impl TlWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn write_int256(&mut self, value: &[u8; 32]) {
        self.buf.put_slice(value);
    }

    /// Writes a TL `bytes` value with its length prefix and alignment padding.
    ///
    /// For values whose size is not bounded by the caller use
    /// [`try_write_bytes`](Self::try_write_bytes).
    ///
    /// # Panics
    ///
    /// Panics if `value` is longer than 16 MiB, which TL cannot represent.
    pub fn write_bytes(&mut self, value: &[u8]) {
        let len = value.len();
        assert!(len <= MAX_BYTES_LEN, "TL bytes value too long: {len}");
        self.put_bytes_unchecked(value);
    }

    /// Writes a TL `bytes` value, rejecting values TL cannot represent.
    ///
    /// # Errors
    ///
    /// Returns [`TlError::ValueTooLong`] if `value` is longer than 16 MiB. Nothing
    /// is written in that case.
    pub fn try_write_bytes(&mut self, value: &[u8]) -> Result<(), TlError> {
        if value.len() > MAX_BYTES_LEN {
            return Err(TlError::ValueTooLong { len: value.len(), max: MAX_BYTES_LEN });
        }
        self.put_bytes_unchecked(value);
        Ok(())
    }

    fn put_bytes_unchecked(&mut self, value: &[u8]) {
        let len = value.len();

        // callers check that len fits in 24 bits
        let len_le = (len as u32).to_le_bytes();
        let header = if len < usize::from(LONG_BYTES_MARKER) {
            self.buf.put_u8(len_le[0]);
            1
        } else {
            self.buf.put_u8(LONG_BYTES_MARKER);
            self.buf.put_slice(&len_le[..3]);
            4
        };

        self.buf.put_slice(value);
        let padding = (4 - (header + len) % 4) % 4;
        self.buf.put_bytes(0, padding);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Appends already-encoded TL data verbatim.
    pub fn write_raw(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor-based TL decoder over a borrowed buffer.
#[derive(Debug)]
pub struct TlReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TlReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TlError> {
        if self.remaining() < n {
            return Err(TlError::UnexpectedEof { needed: n, remaining: self.remaining() });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], TlError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u32(&mut self) -> Result<u32, TlError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, TlError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, TlError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_int256(&mut self) -> Result<[u8; 32], TlError> {
        self.take_array()
    }

    /// Reads a boxed constructor id and checks it against `expected`.
    pub fn expect_constructor(&mut self, expected: u32) -> Result<(), TlError> {
        let found = self.read_u32()?;
        if found != expected {
            return Err(TlError::UnexpectedConstructor { expected, found });
        }
        Ok(())
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], TlError> {
        let first = self.take(1)?[0];
        let (header, len) = if first == LONG_BYTES_MARKER {
            let raw = self.take(3)?;
            (4, usize::from(raw[0]) | usize::from(raw[1]) << 8 | usize::from(raw[2]) << 16)
        } else {
            (1, usize::from(first))
        };

        let value = self.take(len)?;
        let padding = (4 - (header + len) % 4) % 4;
        self.take(padding)?;
        Ok(value)
    }

    pub fn read_string(&mut self) -> Result<String, TlError> {
        let raw = self.read_bytes()?;
        std::str::from_utf8(raw).map(str::to_owned).map_err(|_| TlError::InvalidUtf8)
    }

    /// Fails if any input is left unread.
    pub fn finish(&self) -> Result<(), TlError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(TlError::TrailingBytes(n)),
        }
    }
}
