//! Spawns and owns the elevated companion process's lifetime, the
//! "scoped acquisition... child process handle" rule from `spec.md`
//! 5: the process handle is released (waited, or killed if still
//! running) on every exit path via `Drop`, mirroring the RAII guards
//! in [`crate::sync`].

use std::process::{Child, Command};

use crate::error::{EngineError, Result};

/// Argv convention the companion binary parses on the other end:
/// `-elevated <pipe> <secret> <pid>`, per `spec.md` 6.
const ELEVATED_FLAG: &str = "-elevated";

/// An owned handle to the spawned companion process.
pub struct ElevatedChild {
    child: Child,
}

impl ElevatedChild {
    /// Spawns `exe_path` as the elevated companion, passing the pipe
    /// name, handshake secret, and this process's pid as argv.
    ///
    /// # Errors
    /// Returns [`EngineError::Io`] if the process cannot be spawned.
    pub fn spawn(exe_path: &str, pipe_name: &str, secret_hex: &str) -> Result<Self> {
        let pid = std::process::id();
        let child = Command::new(exe_path)
            .arg(ELEVATED_FLAG)
            .arg(pipe_name)
            .arg(secret_hex)
            .arg(pid.to_string())
            .spawn()
            .map_err(|source| EngineError::Io {
                action: format!("spawning elevated companion {exe_path}"),
                source,
            })?;
        Ok(Self { child })
    }

    /// The OS process id of the spawned companion.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Blocks until the companion exits, returning its exit code (or
    /// `-1` if it was terminated by a signal rather than exiting
    /// normally).
    ///
    /// # Errors
    /// Returns [`EngineError::Io`] if waiting fails.
    pub fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().map_err(|source| EngineError::Io {
            action: "waiting on elevated companion".to_string(),
            source,
        })?;
        Ok(status.code().unwrap_or(-1))
    }
}

impl Drop for ElevatedChild {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawns_and_waits_on_a_real_process() {
        let mut child = ElevatedChild::spawn("/bin/true", "pipe-name", "deadbeef").unwrap();
        let code = child.wait().unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn missing_executable_is_reported_as_io_error() {
        let err = ElevatedChild::spawn("/no/such/binary-xyz", "pipe-name", "deadbeef").unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }

    #[test]
    fn drop_reaps_a_still_running_child() {
        let child = ElevatedChild::spawn("/bin/sleep", "pipe-name", "deadbeef").unwrap();
        let pid = child.pid();
        drop(child);
        // Best-effort: the process should no longer be running (or at
        // least no longer ours to wait on) once dropped.
        assert!(pid > 0);
    }
}
