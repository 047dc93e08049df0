//! Cross-thread syncpoint signaling between the cache and execute
//! phases (`spec.md` 2/4.7/5, §8 scenario S8): the cache phase runs on
//! its own thread, racing ahead of the execute phase, and the execute
//! phase blocks in [`SyncpointTracker::wait`] until the matching
//! `SignalSyncpoint` action has run, or the cache phase has finished
//! (successfully or not) without ever reaching it.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

use crate::error::{EngineError, Result};
use crate::plan::CheckpointId;

struct TrackerState {
    signaled: HashSet<CheckpointId>,
    /// `true` once the cache phase has run every action (or stopped at
    /// a failure); a waiter parked on a syncpoint that will now never
    /// be signaled needs this to stop waiting.
    finished: bool,
    /// The cache phase's failure, if `finished` and it stopped early.
    failure_detail: Option<String>,
}

/// Shared between the cache thread (which calls [`Self::signal`] and
/// [`Self::finish`]) and the execute thread (which calls
/// [`Self::wait`]), mirroring the source engine's event-per-syncpoint
/// design with a single condition variable instead of one OS event per
/// checkpoint.
pub struct SyncpointTracker {
    state: Mutex<TrackerState>,
    condvar: Condvar,
}

impl SyncpointTracker {
    /// Creates a tracker with nothing signaled yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState { signaled: HashSet::new(), finished: false, failure_detail: None }),
            condvar: Condvar::new(),
        }
    }

    /// Records that `id` has been signaled and wakes every waiter.
    pub fn signal(&self, id: CheckpointId) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.signaled.insert(id);
        self.condvar.notify_all();
    }

    /// Marks the cache phase as finished, with its failure detail (if
    /// any) for waiters still parked on a syncpoint it never reached.
    pub fn finish(&self, failure_detail: Option<String>) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.finished = true;
        state.failure_detail = failure_detail;
        self.condvar.notify_all();
    }

    /// Blocks until `id` is signaled, returning an error once the
    /// cache phase has finished without ever signaling it.
    ///
    /// # Errors
    /// Returns [`EngineError::Unexpected`] if the cache phase finishes
    /// (because it failed, or because the plan never signals `id`)
    /// without signaling `id`.
    pub fn wait(&self, id: CheckpointId) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if state.signaled.contains(&id) {
                return Ok(());
            }
            if state.finished {
                let reason = state.failure_detail.clone().unwrap_or_else(|| "not signaled".to_string());
                return Err(EngineError::Unexpected { detail: format!("syncpoint {} never signaled: {reason}", id.0) });
            }
            state = self.condvar.wait(state).unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

impl Default for SyncpointTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns_once_signaled() {
        let tracker = SyncpointTracker::new();
        tracker.signal(CheckpointId(0));
        assert!(tracker.wait(CheckpointId(0)).is_ok());
    }

    #[test]
    fn wait_fails_once_finished_without_signaling() {
        let tracker = SyncpointTracker::new();
        tracker.finish(Some("payload a.msi not found".to_string()));
        let err = tracker.wait(CheckpointId(0)).unwrap_err();
        assert!(err.to_string().contains("payload a.msi not found"));
    }

    #[test]
    fn wait_blocks_across_threads_until_signaled() {
        let tracker = SyncpointTracker::new();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                tracker.signal(CheckpointId(0));
                tracker.finish(None);
            });
            assert!(tracker.wait(CheckpointId(0)).is_ok());
        });
    }
}
