//! Phase B interpreter (`spec.md` 4.7/4.9): walks a plan's
//! `execute_actions` list against the live [`BundleState`], dispatching
//! each [`ExecutePlanAction`] to the package's driver, and performs the
//! rollback walk (`spec.md` 4.7, §8 scenario S5) when a package fails.
//!
//! Package drivers only convert a failure to success when invoked with
//! `rollback: true` (see `drivers::exe::ExeDriver::execute`); forward
//! execution's own "ignore a non-vital failure" rule (`spec.md` 4.7/§7)
//! is implemented here instead, by re-asking the UI after a failed
//! package whose `vital` flag is `false`.

use crate::drivers::registry::DriverRegistry;
use crate::drivers::{merge_restart, ProgressMessage, UiResponse};
use crate::elevation::{ControlMessage, Elevation, RestartState};
use crate::error::{EngineError, Result};
use crate::plan::actions::{ExecutePlanAction, MspTargetEntry};
use crate::plan::ordering::{boundary_indices, nearest_boundary_at_or_before, CheckpointId};
use crate::state::package::PackageId;
use crate::state::BundleState;

use super::sync_tracker::SyncpointTracker;

/// What the execute phase accomplished, for [`super::ApplyEngine::run`]
/// to fold into its overall [`super::ApplyOutcome`].
pub struct ExecutePhaseOutcome {
    /// The failure that stopped the phase, after rollback has already
    /// run, if rollback did not resume forward execution.
    pub failure: Option<EngineError>,
    /// Strongest restart requirement observed across every package and
    /// elevated action run.
    pub restart: RestartState,
}

/// Runs `actions` against `state`, rolling back to the nearest boundary
/// (and resuming forward from the next one, per scenario S6) on a
/// non-vital failure, or aborting after a full rollback walk on a
/// vital one (scenario S5).
///
/// `tracker` gates [`ExecutePlanAction::WaitSyncpoint`]: the cache
/// phase runs concurrently on its own thread (`apply::run`'s module
/// doc), so waiting genuinely blocks until that thread signals the
/// syncpoint or finishes without reaching it (§8 scenario S8).
pub fn run(
    actions: &[ExecutePlanAction],
    rollback_actions: &[ExecutePlanAction],
    state: &BundleState,
    registry: &DriverRegistry<'_>,
    mut elevation: Option<&mut dyn Elevation>,
    tracker: &SyncpointTracker,
    mut msg_cb: impl FnMut(PackageId, ProgressMessage) -> UiResponse,
) -> ExecutePhaseOutcome {
    let mut restart = RestartState::None;
    let mut index = 0;

    while index < actions.len() {
        let action = &actions[index];
        match step(action, state, registry, &mut elevation, Some(tracker), &mut restart, &mut msg_cb, false) {
            Ok(()) => index += 1,
            Err(err) => {
                let boundary = nearest_boundary_at_or_before(actions, index);
                let (stop_at, vital) = match boundary {
                    Some((boundary_idx, vital)) => {
                        let ExecutePlanAction::RollbackBoundary { id, .. } = &actions[boundary_idx] else {
                            unreachable!("nearest_boundary_at_or_before only returns RollbackBoundary indices")
                        };
                        (Some((boundary_idx, *id)), vital)
                    }
                    None => (None, true),
                };

                do_rollback_walk(
                    rollback_actions,
                    stop_at.map(|(_, id)| id),
                    state,
                    registry,
                    &mut elevation,
                    &mut restart,
                    &mut msg_cb,
                );

                if vital {
                    return ExecutePhaseOutcome { failure: Some(err), restart };
                }

                let boundary_idx = stop_at.map_or(0, |(i, _)| i);
                index = boundary_indices(actions).into_iter().find(|&i| i > boundary_idx).unwrap_or(actions.len());
            }
        }
    }

    ExecutePhaseOutcome { failure: None, restart }
}

/// Best-effort undo walk over an already-reversed rollback list,
/// executing each entry until a [`ExecutePlanAction::RollbackBoundary`]
/// matching `stop_at` is reached (not executed, just a stop marker).
/// `stop_at == None` means walk the entire list -- used when the
/// failure occurred before any boundary had been passed.
fn do_rollback_walk(
    rollback_actions: &[ExecutePlanAction],
    stop_at: Option<CheckpointId>,
    state: &BundleState,
    registry: &DriverRegistry<'_>,
    elevation: &mut Option<&mut dyn Elevation>,
    restart: &mut RestartState,
    msg_cb: &mut impl FnMut(PackageId, ProgressMessage) -> UiResponse,
) {
    for action in rollback_actions {
        if let ExecutePlanAction::RollbackBoundary { id, .. } = action {
            if Some(*id) == stop_at {
                break;
            }
            continue;
        }
        let _ = step(action, state, registry, elevation, None, restart, msg_cb, true);
    }
}

#[allow(clippy::too_many_arguments)]
fn step(
    action: &ExecutePlanAction,
    state: &BundleState,
    registry: &DriverRegistry<'_>,
    elevation: &mut Option<&mut dyn Elevation>,
    tracker: Option<&SyncpointTracker>,
    restart: &mut RestartState,
    msg_cb: &mut impl FnMut(PackageId, ProgressMessage) -> UiResponse,
    rollback: bool,
) -> Result<()> {
    match action {
        ExecutePlanAction::Checkpoint(_) | ExecutePlanAction::RollbackBoundary { .. } => Ok(()),
        ExecutePlanAction::WaitSyncpoint(id) => wait_syncpoint(*id, tracker),
        ExecutePlanAction::ExecutePackage { package_id, action, .. } => {
            execute_package(*package_id, action, None, state, registry, restart, msg_cb, rollback)
        }
        ExecutePlanAction::MspTarget { product_code, targets } => {
            execute_msp_target(product_code, targets, state, registry, restart, msg_cb, rollback)
        }
        ExecutePlanAction::PackageProvider { package_id, register } => dispatch_elevation(
            elevation,
            ControlMessage::ExecutePackageProvider { package_id: package_id.0, register: *register },
            restart,
        ),
        ExecutePlanAction::PackageDependency { package_id, dependency_key, register } => dispatch_elevation(
            elevation,
            ControlMessage::ExecutePackageDependency {
                package_id: package_id.0,
                dependency_key: dependency_key.clone(),
                register: *register,
            },
            restart,
        ),
        ExecutePlanAction::CompatiblePackage { package_id } => dispatch_elevation(
            elevation,
            ControlMessage::LoadCompatiblePackage { package_id: package_id.0 },
            restart,
        ),
    }
}

fn wait_syncpoint(id: CheckpointId, tracker: Option<&SyncpointTracker>) -> Result<()> {
    let Some(tracker) = tracker else { return Ok(()) };
    tracker.wait(id)
}

#[allow(clippy::too_many_arguments)]
fn execute_package(
    package_id: PackageId,
    action: &crate::state::package::ExecuteAction,
    target: Option<&str>,
    state: &BundleState,
    registry: &DriverRegistry<'_>,
    restart: &mut RestartState,
    msg_cb: &mut impl FnMut(PackageId, ProgressMessage) -> UiResponse,
    rollback: bool,
) -> Result<()> {
    let pkg = state.package(package_id).ok_or_else(|| EngineError::NotFound { what: format!("package {}", package_id.0) })?;
    let driver = registry.get(package_id)?;
    let mut pkg_cb = |msg: ProgressMessage| msg_cb(package_id, msg);

    match driver.execute(action, &state.variables, rollback, target, &mut pkg_cb, restart) {
        Ok(()) => Ok(()),
        Err(err) if !rollback && !pkg.vital => {
            let response = pkg_cb(ProgressMessage::Error { code: -1, message: err.to_string() });
            if response == UiResponse::Ignore {
                Ok(())
            } else {
                Err(err)
            }
        }
        Err(err) => Err(err),
    }
}

/// Runs one merged `msp_target` action: every entry in its
/// insertion-sorted order, each dispatched through its own package's
/// driver with `target` set to the product this action names
/// (`spec.md` 4.5/4.7). A non-vital entry whose driver returns
/// `Ignore` does not stop later entries in the same merge; a vital
/// failure (or an `Abort`/unignored error) stops the whole action so
/// the caller's boundary/rollback handling takes over, matching
/// `execute_package`'s own per-package ignore rule.
fn execute_msp_target(
    product_code: &str,
    targets: &[MspTargetEntry],
    state: &BundleState,
    registry: &DriverRegistry<'_>,
    restart: &mut RestartState,
    msg_cb: &mut impl FnMut(PackageId, ProgressMessage) -> UiResponse,
    rollback: bool,
) -> Result<()> {
    for entry in targets {
        execute_package(entry.package_id, &entry.action, Some(product_code), state, registry, restart, msg_cb, rollback)?;
    }
    Ok(())
}

fn dispatch_elevation(
    elevation: &mut Option<&mut dyn Elevation>,
    message: ControlMessage,
    restart: &mut RestartState,
) -> Result<()> {
    match elevation.as_deref_mut() {
        Some(client) => {
            let candidate = client.send_control(&message)?;
            merge_restart(restart, candidate);
            Ok(())
        }
        None => {
            tracing::debug!(?message, "no elevation client attached, skipping dependency registration action");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::exe::test_support::FakeProcessExecutor;
    use crate::drivers::exe::ExeDriver;
    use crate::state::package::{Package, PackageKind, RollbackAction};
    use crate::variables::builtins::test_support::{FakeHostInfo, FakeKnownFolders};

    fn ignore_everything(_: PackageId, _: ProgressMessage) -> UiResponse {
        UiResponse::Ignore
    }

    #[test]
    fn vital_failure_rolls_back_to_boundary_and_aborts() {
        let executor = FakeProcessExecutor { exit_code: 1, ..FakeProcessExecutor::default() };
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let bad_driver = ExeDriver::new(&executor, &folders, &host, "bad.exe", "", None, "");

        let good_executor = FakeProcessExecutor::default();
        let good_driver = ExeDriver::new(&good_executor, &folders, &host, "good.exe", "", None, "");

        let mut state = BundleState::new();
        state.packages.push(Package::new(PackageId(1), PackageKind::Exe));
        state.packages.push(Package::new(PackageId(2), PackageKind::Exe));
        state.packages[0].vital = true;
        state.packages[1].vital = true;

        let mut registry = DriverRegistry::new();
        registry.insert(PackageId(1), &good_driver);
        registry.insert(PackageId(2), &bad_driver);

        let actions = vec![
            ExecutePlanAction::ExecutePackage {
                package_id: PackageId(1),
                action: crate::state::package::ExecuteAction::Install,
                rollback: RollbackAction::Uninstall,
            },
            ExecutePlanAction::RollbackBoundary { id: CheckpointId(0), vital: true },
            ExecutePlanAction::ExecutePackage {
                package_id: PackageId(2),
                action: crate::state::package::ExecuteAction::Install,
                rollback: RollbackAction::Uninstall,
            },
        ];
        let rollback_actions = crate::plan::builder::build_rollback_actions(&actions);

        let tracker = SyncpointTracker::new();
        let outcome = run(&actions, &rollback_actions, &state, &registry, None, &tracker, |_, _| UiResponse::Abort);
        assert!(outcome.failure.is_some());
    }

    #[test]
    fn non_vital_failure_resumes_forward_after_boundary() {
        let bad_executor = FakeProcessExecutor { exit_code: 1, ..FakeProcessExecutor::default() };
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let bad_driver = ExeDriver::new(&bad_executor, &folders, &host, "bad.exe", "", None, "");

        let good_executor = FakeProcessExecutor::default();
        let good_driver = ExeDriver::new(&good_executor, &folders, &host, "good.exe", "", None, "");

        let mut state = BundleState::new();
        state.packages.push(Package::new(PackageId(1), PackageKind::Exe));
        state.packages.push(Package::new(PackageId(2), PackageKind::Exe));
        state.packages[0].vital = false;
        state.packages[1].vital = true;

        let mut registry = DriverRegistry::new();
        registry.insert(PackageId(1), &bad_driver);
        registry.insert(PackageId(2), &good_driver);

        let actions = vec![
            ExecutePlanAction::ExecutePackage {
                package_id: PackageId(1),
                action: crate::state::package::ExecuteAction::Install,
                rollback: RollbackAction::Uninstall,
            },
            ExecutePlanAction::RollbackBoundary { id: CheckpointId(0), vital: false },
            ExecutePlanAction::ExecutePackage {
                package_id: PackageId(2),
                action: crate::state::package::ExecuteAction::Install,
                rollback: RollbackAction::Uninstall,
            },
            ExecutePlanAction::RollbackBoundary { id: CheckpointId(1), vital: true },
        ];
        let rollback_actions = crate::plan::builder::build_rollback_actions(&actions);

        let tracker = SyncpointTracker::new();
        let outcome = run(&actions, &rollback_actions, &state, &registry, None, &tracker, ignore_everything);
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn syncpoint_wait_inherits_cache_phase_failure() {
        let state = BundleState::new();
        let registry = DriverRegistry::new();
        let actions = vec![ExecutePlanAction::WaitSyncpoint(CheckpointId(0))];
        let rollback_actions = Vec::new();
        let tracker = SyncpointTracker::new();
        tracker.finish(Some(EngineError::NotFound { what: "payload a.msi".to_string() }.to_string()));
        let outcome = run(&actions, &rollback_actions, &state, &registry, None, &tracker, |_, _| UiResponse::Abort);
        assert!(outcome.failure.is_some());
    }
}
