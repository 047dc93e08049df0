//! Companion-side elevation server: a message-type dispatch table (the
//! §9 redesign-flag replacement for the COM opcode table), pumping one
//! thread per pipe and reporting its exit/restart state back to the
//! parent on termination.

use crate::error::Result;
use crate::pipe::{DuplexChannel, Frame, PipeTransport};

use super::messages::{CacheMessage, ControlMessage, MessageType, ResponseMessage, RestartState};

/// Implemented once by the companion binary; each method performs the
/// actual privileged work for its message family and returns the
/// restart implication, analogous to how the other drivers in
/// [`crate::drivers`] isolate the real OS work behind a small trait.
pub trait ElevationHandler: Send {
    /// Handles one control-plane request.
    ///
    /// # Errors
    /// Any [`crate::EngineError`] describing why the action failed.
    fn handle_control(&mut self, message: ControlMessage) -> Result<RestartState>;

    /// Handles one cache-plane request.
    ///
    /// # Errors
    /// As [`Self::handle_control`].
    fn handle_cache(&mut self, message: CacheMessage) -> Result<RestartState>;
}

/// The set of [`MessageType`] tags routed to
/// [`ElevationHandler::handle_cache`] rather than `handle_control`.
fn is_cache_plane(message_type: MessageType) -> bool {
    matches!(
        message_type,
        MessageType::LayoutBundle | MessageType::CacheOrLayoutContainerOrPayload | MessageType::CacheCleanup
    )
}

/// Pumps `transport`, dispatching every request frame to `handler`
/// until the peer closes the pipe or a control message signals
/// session end (`ApplyUninitialize`), returning the last restart state
/// observed.
///
/// # Errors
/// Propagates a transport I/O error that is not simple peer-closed
/// (an `UnexpectedEof` is treated as normal termination, not an
/// error).
pub fn serve<C: DuplexChannel>(
    transport: &mut PipeTransport<C>,
    handler: &mut dyn ElevationHandler,
) -> Result<RestartState> {
    let mut last_restart = RestartState::None;
    loop {
        let frame = match transport.recv() {
            Ok(frame) => frame,
            Err(crate::EngineError::Io { source, .. }) if source.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(last_restart)
            }
            Err(other) => return Err(other),
        };
        let message_type = MessageType::from_u32(frame.msg_type)?;
        let outcome = dispatch(message_type, &frame.payload, handler);
        let response = match &outcome {
            Ok(restart) => {
                last_restart = *restart;
                ResponseMessage::ok_with_restart(*restart)
            }
            Err(e) => ResponseMessage::failure(error_code(e), e.to_string()),
        };
        transport.send(&Frame::new(MessageType::Result as u32, response.encode()))?;
        if matches!(message_type, MessageType::ApplyUninitialize) && outcome.is_ok() {
            return Ok(last_restart);
        }
    }
}

fn dispatch(
    message_type: MessageType,
    payload: &[u8],
    handler: &mut dyn ElevationHandler,
) -> Result<RestartState> {
    if is_cache_plane(message_type) {
        handler.handle_cache(CacheMessage::decode(message_type, payload)?)
    } else {
        handler.handle_control(ControlMessage::decode(message_type, payload)?)
    }
}

fn error_code(error: &crate::EngineError) -> i32 {
    match error {
        crate::EngineError::ChildFailed { code, .. } => *code,
        _ => -1,
    }
}

/// Reference [`ElevationHandler`] for the standalone companion binary.
///
/// Most control-plane requests name a product/patch code that only a
/// manifest-parsing collaborator can resolve to a real
/// [`crate::drivers::native_installer::InstallerDatabase`] or
/// [`crate::drivers::patch::PatchDatabase`] binding (`spec.md` 1); this
/// reference handler has no such collaborator wired in, so it answers
/// those with [`crate::EngineError::NotImplemented`] rather than
/// guessing. The one request it can honor unaided is
/// [`ControlMessage::ExecuteExePackage`], which carries everything an
/// exe launch needs directly in the message.
pub struct StdElevationHandler {
    executor: crate::drivers::exe::StdProcessExecutor,
}

impl Default for StdElevationHandler {
    fn default() -> Self {
        Self { executor: crate::drivers::exe::StdProcessExecutor }
    }
}

impl StdElevationHandler {
    /// Creates a handler backed by [`crate::drivers::exe::StdProcessExecutor`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ElevationHandler for StdElevationHandler {
    fn handle_control(&mut self, message: ControlMessage) -> Result<RestartState> {
        match message {
            ControlMessage::ApplyInitialize | ControlMessage::ApplyUninitialize => Ok(RestartState::None),
            ControlMessage::ExecuteExePackage { path, arguments, .. } => {
                use crate::drivers::exe::ProcessExecutor;
                let outcome = self.executor.run(&path, &arguments, true)?;
                if outcome.exit_code == 0 {
                    Ok(outcome.restart)
                } else {
                    Err(crate::EngineError::ChildFailed { action: path, code: outcome.exit_code })
                }
            }
            other => Err(crate::EngineError::NotImplemented {
                what: format!("companion has no collaborator bound for {other:?}"),
            }),
        }
    }

    fn handle_cache(&mut self, message: CacheMessage) -> Result<RestartState> {
        Err(crate::EngineError::NotImplemented {
            what: format!("companion has no cache collaborator bound for {message:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::thread;

    struct RecordingHandler {
        control_calls: Vec<ControlMessage>,
    }

    impl ElevationHandler for RecordingHandler {
        fn handle_control(&mut self, message: ControlMessage) -> Result<RestartState> {
            self.control_calls.push(message.clone());
            if matches!(message, ControlMessage::ApplyUninitialize) {
                return Ok(RestartState::None);
            }
            Ok(RestartState::Required)
        }

        fn handle_cache(&mut self, _message: CacheMessage) -> Result<RestartState> {
            Ok(RestartState::None)
        }
    }

    #[test]
    fn serve_dispatches_and_stops_on_apply_uninitialize() {
        let (a, b) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            let mut handler = RecordingHandler { control_calls: Vec::new() };
            let restart = serve(&mut PipeTransport::new(b), &mut handler).unwrap();
            (handler.control_calls, restart)
        });

        let mut client_transport = PipeTransport::new(a);
        client_transport.send(&Frame::new(MessageType::ApplyInitialize as u32, Vec::new())).unwrap();
        let reply = client_transport.recv().unwrap();
        let response = ResponseMessage::decode(&reply.payload).unwrap();
        assert_eq!(response.restart, RestartState::Required);

        client_transport.send(&Frame::new(MessageType::ApplyUninitialize as u32, Vec::new())).unwrap();
        let _ = client_transport.recv().unwrap();
        drop(client_transport);

        let (calls, _restart) = handle.join().unwrap();
        assert_eq!(calls.len(), 2);
    }
}
