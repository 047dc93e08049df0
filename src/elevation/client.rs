//! Controller-side elevation client: sends a control-plane or
//! cache-plane message, blocks on the companion's response, and
//! normalizes the result per `spec.md` 4.8.

use crate::error::Result;
use crate::pipe::{DuplexChannel, Frame, PipeTransport};

use super::messages::{CacheMessage, ControlMessage, MessageType, ResponseMessage, RestartState};

/// Object-safe view of [`ElevationClient`], so callers that only need
/// to forward requests (the apply engine's execute phase) do not also
/// need to carry the transport's channel type parameter.
pub trait Elevation {
    /// As [`ElevationClient::send_control`].
    ///
    /// # Errors
    /// As [`ElevationClient::send_control`].
    fn send_control(&mut self, message: &ControlMessage) -> Result<RestartState>;

    /// As [`ElevationClient::send_cache`].
    ///
    /// # Errors
    /// As [`ElevationClient::send_cache`].
    fn send_cache(&mut self, message: &CacheMessage) -> Result<RestartState>;
}

/// Controller-side handle to an authenticated pipe connection.
pub struct ElevationClient<C: DuplexChannel> {
    transport: PipeTransport<C>,
}

impl<C: DuplexChannel> ElevationClient<C> {
    /// Wraps an already-handshaken transport.
    #[must_use]
    pub fn new(transport: PipeTransport<C>) -> Self {
        Self { transport }
    }

    /// Sends a control-plane request and blocks for the response.
    ///
    /// # Errors
    /// Returns [`crate::EngineError::Io`] if the round trip fails, or
    /// [`crate::EngineError::ChildFailed`] if the companion reports
    /// failure.
    pub fn send_control(&mut self, message: &ControlMessage) -> Result<RestartState> {
        self.round_trip(message.message_type(), message.encode())
    }

    /// Sends a cache-plane request and blocks for the response.
    ///
    /// # Errors
    /// As [`Self::send_control`].
    pub fn send_cache(&mut self, message: &CacheMessage) -> Result<RestartState> {
        self.round_trip(message.message_type(), message.encode())
    }

    fn round_trip(&mut self, message_type: MessageType, payload: Vec<u8>) -> Result<RestartState> {
        self.transport.send(&Frame::new(message_type as u32, payload))?;
        let reply = self.transport.recv()?;
        let response = ResponseMessage::decode(&reply.payload)?;
        response.into_result(format!("{message_type:?}"))
    }
}

impl<C: DuplexChannel> Elevation for ElevationClient<C> {
    fn send_control(&mut self, message: &ControlMessage) -> Result<RestartState> {
        Self::send_control(self, message)
    }

    fn send_cache(&mut self, message: &CacheMessage) -> Result<RestartState> {
        Self::send_cache(self, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::messages::ResponseMessage;
    use std::os::unix::net::UnixStream;
    use std::thread;

    #[test]
    fn round_trip_decodes_a_success_response() {
        let (a, b) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            let mut transport = PipeTransport::new(b);
            let request = transport.recv().unwrap();
            assert_eq!(request.msg_type, MessageType::ApplyInitialize as u32);
            transport.send(&Frame::new(MessageType::Result as u32, ResponseMessage::ok().encode())).unwrap();
        });
        let mut client = ElevationClient::new(PipeTransport::new(a));
        let restart = client.send_control(&ControlMessage::ApplyInitialize).unwrap();
        assert_eq!(restart, RestartState::None);
        handle.join().unwrap();
    }

    #[test]
    fn round_trip_surfaces_a_failure_response() {
        let (a, b) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            let mut transport = PipeTransport::new(b);
            let _request = transport.recv().unwrap();
            transport
                .send(&Frame::new(MessageType::Result as u32, ResponseMessage::failure(42, "nope").encode()))
                .unwrap();
        });
        let mut client = ElevationClient::new(PipeTransport::new(a));
        let err = client.send_control(&ControlMessage::ApplyUninitialize).unwrap_err();
        assert!(matches!(err, crate::EngineError::ChildFailed { code: 42, .. }));
        handle.join().unwrap();
    }
}
