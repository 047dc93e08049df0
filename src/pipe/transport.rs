//! `PipeTransport`: two duplex byte streams carrying framed messages
//! between the controller and the elevated companion, plus the
//! handshake that authenticates the pair before any frame is trusted.
//!
//! The only realistic production target for this codebase is Windows
//! named pipes; [`DuplexChannel`] abstracts the byte stream so tests
//! (and any portable build) can supply a Unix domain socket instead --
//! the same target-gated split the teacher pack's `Cargo.toml` uses
//! between `nix` and `windows-sys`.

use std::io::{Read, Write};

use crate::error::{EngineError, Result};

use super::framing::Frame;

/// A duplex byte stream good enough to carry framed pipe messages.
/// Implemented by `std::os::unix::net::UnixStream`, a real Windows
/// named-pipe handle wrapper, and any in-memory test double.
pub trait DuplexChannel: Read + Write + Send {}

impl<T: Read + Write + Send> DuplexChannel for T {}

/// Wraps one end of a [`DuplexChannel`] with the handshake and framed
/// send/receive operations both the controller and companion use.
pub struct PipeTransport<C: DuplexChannel> {
    channel: C,
}

impl<C: DuplexChannel> PipeTransport<C> {
    /// Wraps an already-connected channel.
    #[must_use]
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Exchanges `secret` with the peer and fails closed if the bytes
    /// it reads back do not match byte-for-byte, per `spec.md`
    /// scenario S7. No framed message may be sent or received before
    /// this succeeds.
    ///
    /// # Errors
    /// Returns [`EngineError::AccessDenied`] on a secret mismatch, or
    /// [`EngineError::Io`] if the exchange itself fails.
    pub fn handshake(&mut self, secret: &[u8]) -> Result<()> {
        self.write_len_prefixed(secret)?;
        let received = self.read_len_prefixed()?;
        if received != secret {
            return Err(EngineError::AccessDenied {
                detail: "pipe handshake secret did not match".to_string(),
            });
        }
        Ok(())
    }

    /// Sends one framed message.
    ///
    /// # Errors
    /// Returns [`EngineError::Io`] if the write fails.
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        self.channel.write_all(&frame.encode()).map_err(|source| EngineError::Io {
            action: "writing pipe frame".to_string(),
            source,
        })
    }

    /// Receives one framed message.
    ///
    /// # Errors
    /// Returns [`EngineError::Io`] if the read fails, or
    /// [`EngineError::CorruptFormat`] if the declared length is
    /// unreasonable.
    pub fn recv(&mut self) -> Result<Frame> {
        let mut header = [0u8; 8];
        self.channel.read_exact(&mut header).map_err(|source| EngineError::Io {
            action: "reading pipe frame header".to_string(),
            source,
        })?;
        let (msg_type, length) = Frame::decode_header(&header)?;
        let mut payload = vec![0u8; length as usize];
        self.channel.read_exact(&mut payload).map_err(|source| EngineError::Io {
            action: "reading pipe frame payload".to_string(),
            source,
        })?;
        Ok(Frame::new(msg_type, payload))
    }

    fn write_len_prefixed(&mut self, bytes: &[u8]) -> Result<()> {
        let mut header = Vec::with_capacity(4);
        header.extend_from_slice(&u32::try_from(bytes.len()).unwrap_or(u32::MAX).to_le_bytes());
        self.channel.write_all(&header).and_then(|()| self.channel.write_all(bytes)).map_err(|source| {
            EngineError::Io {
                action: "writing pipe handshake secret".to_string(),
                source,
            }
        })
    }

    fn read_len_prefixed(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; 4];
        self.channel.read_exact(&mut header).map_err(|source| EngineError::Io {
            action: "reading pipe handshake secret length".to_string(),
            source,
        })?;
        let len = u32::from_le_bytes(header) as usize;
        let mut buf = vec![0u8; len];
        self.channel.read_exact(&mut buf).map_err(|source| EngineError::Io {
            action: "reading pipe handshake secret".to_string(),
            source,
        })?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::thread;

    #[test]
    fn matching_secrets_complete_the_handshake() {
        let (a, b) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            let mut transport = PipeTransport::new(b);
            transport.handshake(b"correct-horse").unwrap();
        });
        let mut transport = PipeTransport::new(a);
        transport.handshake(b"correct-horse").unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn mismatched_secrets_fail_closed() {
        let (a, b) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            let mut transport = PipeTransport::new(b);
            let _ = transport.handshake(b"wrong-secret");
        });
        let mut transport = PipeTransport::new(a);
        let err = transport.handshake(b"correct-horse").unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied { .. }));
        handle.join().unwrap();
    }

    #[test]
    fn frame_round_trips_over_a_socket_pair() {
        let (a, b) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            let mut transport = PipeTransport::new(b);
            let received = transport.recv().unwrap();
            assert_eq!(received.msg_type, 3);
            assert_eq!(received.payload, vec![9, 9, 9]);
        });
        let mut transport = PipeTransport::new(a);
        transport.send(&Frame::new(3, vec![9, 9, 9])).unwrap();
        handle.join().unwrap();
    }
}
