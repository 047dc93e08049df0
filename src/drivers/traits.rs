//! The shared driver contract (`spec.md` 4.5): every package kind
//! implements the same three operations, with all OS-specific work
//! pushed behind a small per-kind collaborator trait.

use crate::elevation::RestartState;
use crate::error::Result;
use crate::state::package::{CurrentState, DetectedState, ExecuteAction, Package, RequestState, RollbackAction};
use crate::variables::VariableStore;

/// What `detect` found for one package this cycle.
#[derive(Clone, Debug)]
pub struct PackageState {
    /// Overall installed-ness, per `spec.md` 4.5's ordering.
    pub current: CurrentState,
    /// Kind-specific detail (feature states, per-target patch states).
    pub detected: DetectedState,
}

/// A progress or diagnostic event surfaced during `execute`, mirrored
/// from [`crate::elevation::messages::CallbackMessage`] at the driver
/// boundary so drivers do not depend on the pipe layer directly.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressMessage {
    /// Overall progress tick, 0-100.
    Tick {
        /// Percentage complete.
        percentage: u32,
    },
    /// A recoverable error occurred; the UI decides how to proceed.
    Error {
        /// Error code reported by the backend.
        code: i32,
        /// Human-readable detail.
        message: String,
    },
    /// Files the installer needs are held open by running processes.
    FilesInUse {
        /// Names of the processes holding files open.
        process_names: Vec<String>,
    },
}

/// How the UI (or an automated policy) responds to a [`ProgressMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiResponse {
    /// Continue normally.
    Ok,
    /// Retry the failed step.
    Retry,
    /// Ignore the error and continue.
    Ignore,
    /// Abort the package (and, if vital, the apply).
    Abort,
}

/// The three operations every package-kind driver implements, per
/// `spec.md` 4.5.
pub trait PackageDriver {
    /// Detects the package's current installed state.
    ///
    /// # Errors
    /// Any [`crate::EngineError`] describing why detection failed.
    fn detect(&self, pkg: &Package, vars: &VariableStore) -> Result<PackageState>;

    /// Computes the deterministic execute/rollback action pair for a
    /// requested state, given the package's already-detected state.
    ///
    /// # Errors
    /// Any [`crate::EngineError`] describing why planning failed.
    fn plan(&self, pkg: &Package, action: RequestState) -> Result<(ExecuteAction, RollbackAction)>;

    /// Executes (or rolls back) the package's planned action.
    ///
    /// `target` names the specific target product this invocation
    /// applies to; every kind but patch has exactly one implicit
    /// target and ignores it. The patch driver is invoked once per
    /// merged entry of an `msp_target` action (`spec.md` 4.5/4.7), so
    /// it needs to know which product it is patching.
    ///
    /// `msg_cb` reports a [`ProgressMessage`] and is told how to
    /// proceed via its [`UiResponse`] return value; `restart`
    /// accumulates the strongest [`RestartState`] observed.
    ///
    /// # Errors
    /// Any [`crate::EngineError`] describing why execution failed,
    /// unless the UI chose [`UiResponse::Ignore`] for the failure that
    /// would otherwise have been returned.
    fn execute(
        &self,
        action: &ExecuteAction,
        vars: &VariableStore,
        rollback: bool,
        target: Option<&str>,
        msg_cb: &mut dyn FnMut(ProgressMessage) -> UiResponse,
        restart: &mut RestartState,
    ) -> Result<()>;
}

/// Strengthens `restart` to `candidate` if `candidate` implies a
/// stronger restart requirement, per `spec.md` 4.8's normalization
/// rule (`Initiated` > `Required` > `None`).
pub fn merge_restart(restart: &mut RestartState, candidate: RestartState) {
    let rank = |r: RestartState| match r {
        RestartState::None => 0,
        RestartState::Required => 1,
        RestartState::Initiated => 2,
    };
    if rank(candidate) > rank(*restart) {
        *restart = candidate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_restart_only_strengthens() {
        let mut restart = RestartState::None;
        merge_restart(&mut restart, RestartState::Required);
        assert_eq!(restart, RestartState::Required);
        merge_restart(&mut restart, RestartState::None);
        assert_eq!(restart, RestartState::Required);
        merge_restart(&mut restart, RestartState::Initiated);
        assert_eq!(restart, RestartState::Initiated);
    }
}
