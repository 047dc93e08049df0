//! Adapts [`VirtualCursor`] to the `cab` crate's `Read + Seek`
//! requirements and runs the container stream's worker thread.
//!
//! The `cab` crate is the closest real crate on crates.io to the
//! source's "cabinet-style attached archive" reader, so decode logic
//! here is grounded in a genuine registry crate rather than a
//! hand-rolled parser, per `spec.md` 4.4's note on this component.

use std::io::{Read, Seek, SeekFrom};
use std::sync::mpsc::SyncSender;

use crate::error::{EngineError, Result};

use super::cursor::{SeekOrigin, VirtualCursor};
use super::{write_all_to_file, SinkChoice, WorkerEvent};

const CABINET_MAGIC: &[u8; 4] = b"MSCF";

/// `std::io::Read + std::io::Seek` wrapper over a [`VirtualCursor`],
/// the shape the `cab` crate's `Cabinet::new` requires.
struct CursorAdapter(VirtualCursor);

impl Read for CursorAdapter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0
            .read(buf)
            .map_err(|e| std::io::Error::other(e.to_string()))
    }
}

impl Seek for CursorAdapter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let (origin, offset) = match pos {
            SeekFrom::Start(n) => (SeekOrigin::Begin, i64::try_from(n).unwrap_or(i64::MAX)),
            SeekFrom::Current(n) => (SeekOrigin::Current, n),
            SeekFrom::End(n) => (SeekOrigin::End, n),
        };
        self.0
            .seek(origin, offset)
            .map_err(|e| std::io::Error::other(e.to_string()))
    }
}

/// Runs the container stream's worker loop over `cursor`, pushing one
/// [`WorkerEvent`] per payload to `events` and waiting for the
/// caller's [`SinkChoice`] reply before moving to the next entry. This
/// is the single worker thread body spawned by
/// [`super::ContainerStream::open`].
pub(super) fn run_worker(mut cursor: VirtualCursor, events: &SyncSender<WorkerEvent>) {
    let mut magic = [0u8; 4];
    let is_real_cabinet = cursor.read(&mut magic).map(|n| n == 4 && &magic == CABINET_MAGIC).unwrap_or(false);
    let _ = cursor.seek(SeekOrigin::Begin, 0);

    let result = if is_real_cabinet {
        run_real_cabinet(cursor, events)
    } else {
        run_test_double(cursor, events)
    };
    if let Err(e) = result {
        let _ = events.send(WorkerEvent::Failed(e));
        return;
    }
    let _ = events.send(WorkerEvent::End);
}

fn run_real_cabinet(cursor: VirtualCursor, events: &SyncSender<WorkerEvent>) -> Result<()> {
    let adapter = CursorAdapter(cursor);
    let mut cabinet = cab::Cabinet::new(adapter).map_err(|source| EngineError::CorruptFormat {
        what: format!("not a valid cabinet archive: {source}"),
        path: None,
    })?;

    let file_names: Vec<String> = cabinet
        .folder_entries()
        .flat_map(|folder| folder.file_entries().map(|f| f.name().to_string()))
        .collect();

    for name in file_names {
        let (reply_tx, reply_rx) = std::sync::mpsc::sync_channel(0);
        if events
            .send(WorkerEvent::NameAvailable { name: name.clone(), reply: reply_tx })
            .is_err()
        {
            return Ok(());
        }
        let Ok(choice) = reply_rx.recv() else { return Ok(()) };

        let mut body_reader = cabinet
            .read_file(&name)
            .map_err(|source| EngineError::Io { action: format!("reading cabinet entry {name}"), source })?;
        let outcome = deliver(&mut body_reader, choice);
        if events.send(WorkerEvent::BodyDone { result: outcome }).is_err() {
            return Ok(());
        }
    }
    Ok(())
}

fn deliver(reader: &mut impl Read, choice: SinkChoice) -> Result<Vec<u8>> {
    match choice {
        SinkChoice::Skip => {
            std::io::copy(reader, &mut std::io::sink()).map_err(|source| EngineError::Io {
                action: "skipping cabinet entry body".to_string(),
                source,
            })?;
            Ok(Vec::new())
        }
        SinkChoice::Buffer => {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map_err(|source| EngineError::Io {
                action: "buffering cabinet entry body".to_string(),
                source,
            })?;
            Ok(buf)
        }
        SinkChoice::File(path) => {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map_err(|source| EngineError::Io {
                action: "reading cabinet entry body".to_string(),
                source,
            })?;
            write_all_to_file(&path, &buf).map_err(|source| EngineError::Io {
                action: format!("writing cabinet entry to {}", path.display()),
                source,
            })?;
            Ok(Vec::new())
        }
    }
}

/// A deterministic, in-repo-only stand-in for a real cabinet archive,
/// used by this crate's own unit tests
/// ([`super::tests`]) so they do not depend on a binary `.cab`
/// fixture: `u32` entry count, then per entry a length-prefixed name
/// and a length-prefixed body, all via [`crate::codec`].
fn run_test_double(mut cursor: VirtualCursor, events: &SyncSender<WorkerEvent>) -> Result<()> {
    let bytes = cursor.read_to_end()?;
    let mut reader = crate::codec::Reader::new(&bytes);
    let count = reader.read_u32()?;
    for _ in 0..count {
        let name = reader.read_string()?;
        let len = reader.read_u32()? as usize;
        let body = reader.read_bytes(len)?.to_vec();

        let (reply_tx, reply_rx) = std::sync::mpsc::sync_channel(0);
        if events
            .send(WorkerEvent::NameAvailable { name, reply: reply_tx })
            .is_err()
        {
            return Ok(());
        }
        let Ok(choice) = reply_rx.recv() else { return Ok(()) };
        let outcome = deliver(&mut &body[..], choice);
        if events.send(WorkerEvent::BodyDone { result: outcome }).is_err() {
            return Ok(());
        }
    }
    Ok(())
}
