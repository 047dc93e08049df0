//! Apply engine (C11, `spec.md` 4.7/4.9): runs a built [`crate::plan::Plan`]
//! against a [`BundleState`] through its three phases -- bundle
//! registration, cache (A) and execute (B) running concurrently on
//! their own threads, followed by best-effort cleanup (C) -- scoped by
//! a [`CrossProcessMutex`] so only one apply runs per [`ApplyScope`] at
//! a time.
//!
//! Cache and execute are each their own free-function interpreter
//! ([`cache_phase::run`], [`execute_phase::run`]); this module is the
//! glue that runs them concurrently via [`std::thread::scope`], per
//! `spec.md` 2/4.7/5's "parallel threads with cooperative progress":
//! the cache thread streams payloads into the cache and signals a
//! [`sync_tracker::SyncpointTracker`] as each package's are ready,
//! while the execute thread (the calling thread) blocks on that
//! tracker at each `WaitSyncpoint` action instead of racing ahead of
//! work that is not yet on disk (§8 scenario S8). Registration runs
//! first and clean runs last, fully serialized around the scoped pair.

pub mod cache_phase;
pub mod clean_phase;
pub mod execute_phase;
pub mod progress;
pub mod sync_tracker;

use crate::cache::acquire::SourceChoice;
use crate::cache::CacheManager;
use crate::drivers::{merge_restart, DriverRegistry, ProgressMessage, UiResponse};
use crate::elevation::{ControlMessage, Elevation, RestartState};
use crate::error::Result;
use crate::plan::actions::RegistrationAction;
use crate::plan::Plan;
use crate::state::package::PackageId;
use crate::state::{BundleState, Payload};
use crate::sync::{ApplyScope, CrossProcessMutex};

use cache_phase::CacheContext;
use sync_tracker::SyncpointTracker;

/// Collaborators one `ApplyEngine::run` call needs, gathered so the
/// caller does not thread five parameters through every phase.
pub struct ApplyContext<'a> {
    /// Content-addressed payload cache.
    pub cache: &'a CacheManager,
    /// Phase A collaborators (search roots, downloader, layout dest).
    pub cache_ctx: CacheContext<'a>,
    /// Phase B driver lookup, one entry per package in the plan.
    pub registry: &'a DriverRegistry<'a>,
    /// Cross-process install lock.
    pub mutex: &'a dyn CrossProcessMutex,
    /// Which scope (`spec.md` 9) this apply runs under.
    pub scope: ApplyScope,
}

/// What one `apply` call produced.
pub struct ApplyOutcome {
    /// `Ok(())` if every phase completed (or a non-vital failure was
    /// ignored and rollback resumed forward to completion);
    /// otherwise the terminal failure, already rolled back.
    pub result: Result<()>,
    /// Strongest restart requirement observed across every phase.
    pub restart: RestartState,
}

/// Runs `plan` against `state`. See the module doc for phase order.
///
/// `prompt` runs on the cache thread and so must be `Send`; `msg_cb`
/// and `elevation` are only ever touched from the execute thread (the
/// calling thread), so neither needs to be.
pub fn run(
    state: &mut BundleState,
    plan: &Plan,
    ctx: &ApplyContext<'_>,
    mut elevation: Option<&mut dyn Elevation>,
    mut prompt: impl FnMut(&Payload) -> SourceChoice + Send,
    mut msg_cb: impl FnMut(PackageId, ProgressMessage) -> UiResponse,
) -> ApplyOutcome {
    let mut restart = RestartState::None;

    let _guard = match ctx.mutex.acquire(ctx.scope) {
        Ok(guard) => guard,
        Err(err) => return ApplyOutcome { result: Err(err), restart },
    };

    if let Err(err) = run_registration(&plan.registration_actions, elevation.as_deref_mut(), &mut restart) {
        return ApplyOutcome { result: Err(err), restart };
    }

    let state: &BundleState = state;
    let tracker = SyncpointTracker::new();
    let (mut cache_outcome, exec_outcome) = std::thread::scope(|scope| {
        let cache_handle =
            scope.spawn(|| cache_phase::run(&plan.cache_actions, state, &ctx.cache_ctx, &mut prompt, &tracker));

        let exec_outcome = execute_phase::run(
            &plan.execute_actions,
            &plan.rollback_actions,
            state,
            ctx.registry,
            elevation.as_deref_mut(),
            &tracker,
            &mut msg_cb,
        );

        let cache_outcome = cache_handle.join().unwrap_or_else(|_| cache_phase::CachePhaseOutcome {
            signaled: std::collections::HashSet::new(),
            failure: Some(crate::error::EngineError::Unexpected { detail: "cache thread panicked".to_string() }),
            failed_package: None,
        });
        (cache_outcome, exec_outcome)
    });
    merge_restart(&mut restart, exec_outcome.restart);

    if let Some(err) = cache_outcome.failure.take() {
        cache_phase::do_rollback_cache(&cache_outcome, state, ctx.cache);
        let _ = run_registration(&plan.rollback_registration_actions, elevation.as_deref_mut(), &mut restart);
        return ApplyOutcome { result: Err(err), restart };
    }

    if let Some(err) = exec_outcome.failure {
        let _ = run_registration(&plan.rollback_registration_actions, elevation.as_deref_mut(), &mut restart);
        return ApplyOutcome { result: Err(err), restart };
    }

    clean_phase::run(&plan.clean_actions, state, ctx.cache);
    ApplyOutcome { result: Ok(()), restart }
}

/// Dispatches bundle-level ARP registration via the elevated
/// companion's session lifecycle messages, no-op-and-log when no
/// elevation client is attached (per-user apply needs none).
fn run_registration(
    actions: &[RegistrationAction],
    mut elevation: Option<&mut dyn Elevation>,
    restart: &mut RestartState,
) -> Result<()> {
    for action in actions {
        let message = match action {
            RegistrationAction::Register => ControlMessage::SessionBegin { resume: false },
            RegistrationAction::Unregister => ControlMessage::SessionEnd { installed: false },
        };
        match elevation.as_deref_mut() {
            Some(client) => {
                let candidate = client.send_control(&message)?;
                merge_restart(restart, candidate);
            }
            None => tracing::debug!(?message, "no elevation client attached, skipping bundle registration"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::drivers::exe::test_support::FakeProcessExecutor;
    use crate::drivers::exe::ExeDriver;
    use crate::plan::actions::{CacheAction, CleanAction, ExecutePlanAction};
    use crate::plan::ordering::CheckpointId;
    use crate::state::package::{Package, PackageKind, RollbackAction};
    use crate::state::PayloadKey;
    use crate::sync::InProcessMutex;
    use crate::variables::builtins::test_support::{FakeHostInfo, FakeKnownFolders};

    #[test]
    fn empty_plan_succeeds_with_no_restart_needed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::at_path(dir.path().join("cache"));
        let config = EngineConfig::default();
        let cache_ctx = CacheContext {
            cache: &cache,
            search_roots: Vec::new(),
            downloader: None,
            layout_destination: None,
            config: &config,
        };
        let registry = DriverRegistry::new();
        let mutex = InProcessMutex::new();
        let ctx = ApplyContext { cache: &cache, cache_ctx, registry: &registry, mutex: &mutex, scope: ApplyScope::PerUser };

        let mut state = BundleState::new();
        let plan = Plan::default();

        let outcome = run(&mut state, &plan, &ctx, None, |_| SourceChoice::Abort, |_, _| UiResponse::Abort);
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.restart, RestartState::None);
    }

    #[test]
    fn package_failure_is_rolled_back_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let source_dir = dir.path().join("src");
        std::fs::create_dir_all(&source_dir).unwrap();
        let payload_path = source_dir.join("a.exe");
        std::fs::write(&payload_path, b"hello").unwrap();

        let cache = CacheManager::at_path(dir.path().join("cache"));
        let config = EngineConfig::default();
        let cache_ctx = CacheContext {
            cache: &cache,
            search_roots: Vec::new(),
            downloader: None,
            layout_destination: None,
            config: &config,
        };

        let bad_executor = FakeProcessExecutor { exit_code: 1, ..FakeProcessExecutor::default() };
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let bad_driver = ExeDriver::new(&bad_executor, &folders, &host, "bad.exe", "", None, "");

        let mut registry = DriverRegistry::new();
        registry.insert(PackageId(1), &bad_driver);
        let mutex = InProcessMutex::new();
        let ctx = ApplyContext { cache: &cache, cache_ctx, registry: &registry, mutex: &mutex, scope: ApplyScope::PerUser };

        let mut state = BundleState::new();
        state.packages.push(Package::new(PackageId(1), PackageKind::Exe));
        let mut payload = Payload::new(PayloadKey("a.exe".to_string()), 5, None);
        payload.source_path = Some(payload_path);
        state.payloads.push(payload);

        let mut plan = Plan::default();
        plan.cache_actions = vec![
            CacheAction::PackageStart(PackageId(1)),
            CacheAction::AcquirePayload(PayloadKey("a.exe".to_string())),
            CacheAction::CachePayload(PayloadKey("a.exe".to_string())),
            CacheAction::PackageStop(PackageId(1)),
            CacheAction::SignalSyncpoint(CheckpointId(0)),
        ];
        plan.execute_actions = vec![
            ExecutePlanAction::WaitSyncpoint(CheckpointId(0)),
            ExecutePlanAction::RollbackBoundary { id: CheckpointId(1), vital: true },
            ExecutePlanAction::ExecutePackage {
                package_id: PackageId(1),
                action: crate::state::package::ExecuteAction::Install,
                rollback: RollbackAction::Uninstall,
            },
        ];
        plan.rollback_actions = crate::plan::builder::build_rollback_actions(&plan.execute_actions);
        plan.clean_actions = vec![CleanAction { package_id: PackageId(1) }];

        let outcome = run(&mut state, &plan, &ctx, None, |_| SourceChoice::Abort, |_, _| UiResponse::Abort);
        assert!(outcome.result.is_err());
    }
}
