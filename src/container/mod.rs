//! Container stream: a pull-stream of named payload streams out of an
//! attached container (C5, `spec.md` 4.4).
//!
//! The source drives this with a hand-rolled two-event rendezvous
//! between a worker thread and the caller. Per `spec.md` 9's redesign
//! flag this becomes a bounded `std::sync::mpsc::sync_channel`
//! carrying `{StreamName, StreamSinkChoice}`: the worker thread pushes
//! one entry per payload and blocks until the caller's
//! [`ContainerStream`] replies with a sink choice over a second
//! channel, which is exactly the state machine from `spec.md` 4.4:
//!
//! ```text
//! idle -> next_pending -> name_available -> body_pending
//!                                          \ (skip)     \ (stream_to_*)
//!                                body_pending -> next_pending | closed
//! ```

pub mod cabinet;
pub mod cursor;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::state::{Container, Packaging};

use cursor::VirtualCursor;

/// Where the caller wants the current stream's body delivered.
enum SinkChoice {
    /// Write the body to this filesystem path.
    File(PathBuf),
    /// Buffer the body in memory and return it.
    Buffer,
    /// Discard the body without reading it.
    Skip,
}

/// One message the worker thread pushes toward the caller.
enum WorkerEvent {
    /// A payload is available; `name` is its in-container identifier.
    NameAvailable { name: String, reply: SyncSender<SinkChoice> },
    /// The worker finished writing/buffering/skipping the current
    /// stream's body.
    BodyDone { result: Result<Vec<u8>> },
    /// No more payloads remain.
    End,
    /// The worker hit a fatal error and is shutting down.
    Failed(EngineError),
}

/// The container stream reader's state, mirroring `spec.md` 4.4's
/// diagram.
#[derive(Debug, PartialEq, Eq)]
enum State {
    Idle,
    NextPending,
    NameAvailable,
    BodyPending,
    Closed,
}

/// Pull-stream reader over one container's payloads.
pub struct ContainerStream {
    events: Receiver<WorkerEvent>,
    reply_to_name: Option<SyncSender<SinkChoice>>,
    worker: Option<JoinHandle<()>>,
    state: State,
    current_name: Option<String>,
}

impl ContainerStream {
    /// Opens `container` for streaming from `file_handle` (the shared
    /// underlying file, already positioned per `container.packaging`)
    /// at `path`, spawning the single worker thread that walks the
    /// container's entries.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidArgument`] if `container` is not
    /// attached (embedded/external containers are opened directly by
    /// the cache manager, not streamed here).
    pub fn open(container: &Container, path: &Path) -> Result<Self> {
        if container.packaging != Packaging::Attached {
            return Err(EngineError::InvalidArgument {
                detail: "only attached containers are opened through ContainerStream".to_string(),
            });
        }
        let cursor = VirtualCursor::open(path, 0, container.file_size)?;
        let (event_tx, event_rx) = sync_channel::<WorkerEvent>(0);
        let worker = std::thread::spawn(move || cabinet::run_worker(cursor, &event_tx));
        Ok(Self {
            events: event_rx,
            reply_to_name: None,
            worker: Some(worker),
            state: State::Idle,
            current_name: None,
        })
    }

    /// Advances to the next logical payload, per `spec.md` 4.4.
    /// Returns `Ok(Some(name))` if a payload is available, `Ok(None)`
    /// at end of container.
    ///
    /// # Errors
    /// Returns whatever fatal error the worker thread reported, or
    /// [`EngineError::Unexpected`] if called out of sequence (after
    /// `close`, or while a body is still pending disposal).
    pub fn next_stream(&mut self) -> Result<Option<String>> {
        if self.state == State::BodyPending {
            return Err(EngineError::Unexpected {
                detail: "next_stream called before the current stream's body was disposed".to_string(),
            });
        }
        if self.state == State::Closed {
            return Err(EngineError::Unexpected {
                detail: "next_stream called on a closed container stream".to_string(),
            });
        }
        self.state = State::NextPending;
        match self.events.recv() {
            Ok(WorkerEvent::NameAvailable { name, reply }) => {
                self.reply_to_name = Some(reply);
                self.current_name = Some(name.clone());
                self.state = State::NameAvailable;
                Ok(Some(name))
            }
            Ok(WorkerEvent::End) => {
                self.state = State::Closed;
                Ok(None)
            }
            Ok(WorkerEvent::Failed(e)) => {
                self.state = State::Closed;
                Err(e)
            }
            Ok(WorkerEvent::BodyDone { .. }) | Err(_) => {
                self.state = State::Closed;
                Err(EngineError::Unexpected {
                    detail: "container stream worker disconnected unexpectedly".to_string(),
                })
            }
        }
    }

    /// Streams the current payload's body to `path`, overwriting any
    /// existing file.
    ///
    /// # Errors
    /// Returns [`EngineError::Unexpected`] if no payload is currently
    /// available, else whatever I/O error the worker hits.
    pub fn stream_to_file(&mut self, path: &Path) -> Result<()> {
        self.dispatch_sink(SinkChoice::File(path.to_path_buf()))?;
        Ok(())
    }

    /// Streams the current payload's body into memory and returns it.
    ///
    /// # Errors
    /// As [`Self::stream_to_file`].
    pub fn stream_to_buffer(&mut self) -> Result<Vec<u8>> {
        self.dispatch_sink(SinkChoice::Buffer)
    }

    /// Discards the current payload's body without reading it.
    ///
    /// # Errors
    /// As [`Self::stream_to_file`].
    pub fn skip_stream(&mut self) -> Result<()> {
        self.dispatch_sink(SinkChoice::Skip)?;
        Ok(())
    }

    fn dispatch_sink(&mut self, choice: SinkChoice) -> Result<Vec<u8>> {
        if self.state != State::NameAvailable {
            return Err(EngineError::Unexpected {
                detail: "no payload is currently available to dispose".to_string(),
            });
        }
        let reply = self.reply_to_name.take().ok_or_else(|| EngineError::Unexpected {
            detail: "missing reply channel for current payload".to_string(),
        })?;
        self.state = State::BodyPending;
        reply.send(choice).map_err(|_| EngineError::Unexpected {
            detail: "container stream worker disconnected before reply".to_string(),
        })?;
        match self.events.recv_timeout(Duration::from_secs(300)) {
            Ok(WorkerEvent::BodyDone { result }) => {
                self.state = State::NextPending;
                result
            }
            Ok(WorkerEvent::Failed(e)) => {
                self.state = State::Closed;
                Err(e)
            }
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {
                self.state = State::Closed;
                Err(EngineError::Unexpected {
                    detail: "container stream worker disconnected mid-body".to_string(),
                })
            }
            Err(RecvTimeoutError::Timeout) => Err(EngineError::Timeout {
                waiting_on: "container stream body".to_string(),
            }),
        }
    }

    /// Releases the worker thread and any open handles. Idempotent.
    pub fn close(&mut self) {
        self.state = State::Closed;
        self.reply_to_name = None;
        if let Some(worker) = self.worker.take() {
            drop(worker.join());
        }
    }
}

impl Drop for ContainerStream {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn write_all_to_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::container::ContainerId;

    fn fake_cabinet(entries: &[(&str, &[u8])]) -> Vec<u8> {
        // Test double format, not a real cabinet: u32 entry count, then
        // per entry a length-prefixed name and length-prefixed body.
        // cabinet::run_worker understands this layout when compiled
        // for tests (see cabinet.rs).
        let mut w = crate::codec::Writer::new();
        w.write_u32(u32::try_from(entries.len()).unwrap());
        for (name, body) in entries {
            w.write_string(name);
            w.write_u32(u32::try_from(body.len()).unwrap());
            w.write_bytes(body);
        }
        w.into_bytes()
    }

    #[test]
    fn streams_payloads_in_order_and_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("container.bin");
        let bytes = fake_cabinet(&[("a.txt", b"hello"), ("b.txt", b"world")]);
        std::fs::write(&path, &bytes).unwrap();

        let container = Container::new(ContainerId(0), Packaging::Attached, bytes.len() as u64);
        let mut stream = ContainerStream::open(&container, &path).unwrap();

        let name = stream.next_stream().unwrap().unwrap();
        assert_eq!(name, "a.txt");
        assert_eq!(stream.stream_to_buffer().unwrap(), b"hello");

        let name = stream.next_stream().unwrap().unwrap();
        assert_eq!(name, "b.txt");
        stream.skip_stream().unwrap();

        assert!(stream.next_stream().unwrap().is_none());
    }

    #[test]
    fn stream_to_file_writes_body() {
        let dir = tempfile::tempdir().unwrap();
        let container_path = dir.path().join("container.bin");
        let bytes = fake_cabinet(&[("only.bin", b"payload-bytes")]);
        std::fs::write(&container_path, &bytes).unwrap();

        let container = Container::new(ContainerId(0), Packaging::Attached, bytes.len() as u64);
        let mut stream = ContainerStream::open(&container, &container_path).unwrap();
        stream.next_stream().unwrap().unwrap();
        let out_path = dir.path().join("out.bin");
        stream.stream_to_file(&out_path).unwrap();
        assert_eq!(std::fs::read(&out_path).unwrap(), b"payload-bytes");
    }

    #[test]
    fn rejects_non_attached_containers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("external.bin");
        std::fs::write(&path, b"x").unwrap();
        let container = Container::new(ContainerId(0), Packaging::External, 1);
        let err = ContainerStream::open(&container, &path).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
    }
}
