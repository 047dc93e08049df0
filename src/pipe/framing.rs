//! The pipe wire frame: `{u32 type, u32 length, payload}`
//! little-endian, built on [`crate::codec`].

use crate::codec::{Reader, Writer};
use crate::error::{EngineError, Result};

/// One framed message crossing the controller/companion pipe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Message-type discriminant, interpreted by
    /// [`crate::elevation::messages`].
    pub msg_type: u32,
    /// Opaque encoded payload.
    pub payload: Vec<u8>,
}

/// An upper bound on a single frame's declared length, rejecting a
/// corrupt or hostile length prefix before it drives an allocation.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

impl Frame {
    /// Creates a frame from a type tag and an already-encoded payload.
    #[must_use]
    pub fn new(msg_type: u32, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    /// Serializes this frame's header and payload to the wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(self.msg_type);
        w.write_u32(u32::try_from(self.payload.len()).unwrap_or(u32::MAX));
        w.write_bytes(&self.payload);
        w.into_bytes()
    }

    /// Reads exactly one frame's header from `bytes` and returns it
    /// plus the byte offset its payload starts at, without requiring
    /// the payload itself to be present yet -- callers that read from
    /// a stream read the 8-byte header first, then read exactly
    /// `length` more bytes for the payload.
    ///
    /// # Errors
    /// Returns [`EngineError::ShortRead`] if fewer than 8 bytes are
    /// available, or [`EngineError::CorruptFormat`] if the declared
    /// length exceeds [`MAX_FRAME_LEN`].
    pub fn decode_header(bytes: &[u8]) -> Result<(u32, u32)> {
        let mut r = Reader::new(bytes);
        let msg_type = r.read_u32()?;
        let length = r.read_u32()?;
        if length > MAX_FRAME_LEN {
            return Err(EngineError::CorruptFormat {
                what: format!("pipe frame length {length} exceeds the {MAX_FRAME_LEN} byte bound"),
                path: None,
            });
        }
        Ok((msg_type, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_payload() {
        let frame = Frame::new(7, vec![1, 2, 3, 4]);
        let bytes = frame.encode();
        let (msg_type, length) = Frame::decode_header(&bytes[..8]).unwrap();
        assert_eq!(msg_type, 7);
        assert_eq!(length, 4);
        assert_eq!(&bytes[8..], &[1, 2, 3, 4]);
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut w = Writer::new();
        w.write_u32(1);
        w.write_u32(MAX_FRAME_LEN + 1);
        let bytes = w.into_bytes();
        let err = Frame::decode_header(&bytes).unwrap_err();
        assert!(matches!(err, EngineError::CorruptFormat { .. }));
    }

    #[test]
    fn short_header_is_a_short_read() {
        let err = Frame::decode_header(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, EngineError::ShortRead { .. }));
    }
}
