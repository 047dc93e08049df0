//! Controller state machine (C12, `spec.md` 2/4.9): the single thread
//! that owns one [`BundleState`] and dispatches the UI's detect/plan/
//! apply/quit verbs against it, each serialized behind the engine's
//! one coarse [`ActivityToken`].
//!
//! Populating the package/payload/container tables from a bundle's
//! embedded XML manifest is explicitly out of scope (`spec.md` 1);
//! callers construct a [`BundleState`] (typically via a manifest-
//! parsing collaborator of their own) and a
//! [`DriverRegistry`](crate::drivers::DriverRegistry) bound to that
//! state's packages, and hand both to [`Controller::new`]. Detect and
//! plan then dispatch through that registry exactly as
//! `apply::execute_phase` does.

pub mod collaborators;

use crate::apply::cache_phase::CacheContext;
use crate::apply::{self, ApplyContext, ApplyOutcome};
use crate::cache::acquire::SourceChoice;
use crate::cache::CacheManager;
use crate::config::EngineConfig;
use crate::drivers::{DriverRegistry, ProgressMessage, UiResponse};
use crate::elevation::Elevation;
use crate::error::Result;
use crate::plan::{CommandAction, PlanBuilder};
use crate::section::SectionReader;
use crate::state::package::{PackageId, RequestState};
use crate::state::{BundleState, Payload};
use crate::sync::{ActivityToken, ApplyScope, CrossProcessMutex};

pub use collaborators::Collaborators;

/// Owns the engine's in-memory state and the collaborators every verb
/// needs, across as many detect/plan/apply cycles as the caller
/// drives.
pub struct Controller<'a> {
    state: BundleState,
    collaborators: Collaborators<'a>,
    cache: CacheManager,
    config: EngineConfig,
    scope: ApplyScope,
    mutex: &'a dyn CrossProcessMutex,
    activity: ActivityToken,
}

impl<'a> Controller<'a> {
    /// Wraps an already-populated `state`, performing the startup
    /// section read (`spec.md` 3's "`None` before `Controller`
    /// performs its startup section read") against the running image.
    ///
    /// # Errors
    /// Returns [`crate::EngineError::Tampered`] if the bundle's
    /// in-file and in-memory sections disagree, or
    /// [`crate::EngineError::CorruptFormat`] if the section cannot be
    /// parsed.
    pub fn new(
        mut state: BundleState,
        bundle_image: &std::path::Path,
        collaborators: Collaborators<'a>,
        cache: CacheManager,
        config: EngineConfig,
        scope: ApplyScope,
        mutex: &'a dyn CrossProcessMutex,
    ) -> Result<Self> {
        let descriptor = SectionReader::open(bundle_image)?;
        SectionReader::validate_against_running_image(&descriptor)?;
        state.section = Some(descriptor);
        Ok(Self { state, collaborators, cache, config, scope, mutex, activity: ActivityToken::new() })
    }

    /// Read-only access to the engine state, for a caller that needs
    /// to inspect detected/planned package state between verbs.
    #[must_use]
    pub fn state(&self) -> &BundleState {
        &self.state
    }

    /// Runs detect (`spec.md` 4.5) against every package, via
    /// `registry`.
    ///
    /// # Errors
    /// Returns [`crate::EngineError::Busy`] if another verb is
    /// in-flight, or the first driver failure encountered.
    pub fn detect(&mut self, registry: &DriverRegistry<'_>) -> Result<()> {
        let _guard = self.activity.acquire()?;
        self.state.detect_reset();
        for idx in 0..self.state.packages.len() {
            let pkg_id = self.state.packages[idx].id;
            let driver = registry.get(pkg_id)?;
            let result = driver.detect(&self.state.packages[idx], &self.state.variables)?;
            let pkg = &mut self.state.packages[idx];
            pkg.current_state = result.current;
            pkg.detected = result.detected;
        }
        Ok(())
    }

    /// Runs plan (`spec.md` 4.6) for `command`, via `registry`, then
    /// sequences the result into `self.state.plan`.
    ///
    /// # Errors
    /// Returns [`crate::EngineError::Busy`] if another verb is
    /// in-flight, a driver's `plan` failure, or a [`PlanBuilder`]
    /// failure.
    pub fn plan(&mut self, registry: &DriverRegistry<'_>, command: CommandAction) -> Result<()> {
        let _guard = self.activity.acquire()?;
        self.state.plan_reset();
        for idx in 0..self.state.packages.len() {
            let pkg_id = self.state.packages[idx].id;
            let requested = if self.state.packages[idx].requested == RequestState::None {
                command.default_request()
            } else {
                self.state.packages[idx].requested
            };
            let driver = registry.get(pkg_id)?;
            let (execute, rollback) = driver.plan(&self.state.packages[idx], requested)?;
            let pkg = &mut self.state.packages[idx];
            pkg.requested = requested;
            pkg.execute = execute;
            pkg.rollback = rollback;
        }
        let plan = PlanBuilder::new(&self.state, command).build()?;
        self.state.plan = Some(plan);
        Ok(())
    }

    /// Runs apply (`spec.md` 4.7/4.9) against the most recently built
    /// plan, via `registry` for execute actions and `elevation` for
    /// every privileged dispatch.
    ///
    /// # Errors
    /// Returns [`crate::EngineError::Busy`] if another verb is
    /// in-flight, or [`crate::EngineError::NotFound`] if `plan` has
    /// not been called yet.
    pub fn apply(
        &mut self,
        registry: &DriverRegistry<'_>,
        elevation: Option<&mut dyn Elevation>,
        prompt: impl FnMut(&Payload) -> SourceChoice + Send,
        msg_cb: impl FnMut(PackageId, ProgressMessage) -> UiResponse,
    ) -> Result<ApplyOutcome> {
        let _guard = self.activity.acquire()?;
        let plan = self.state.plan.clone().ok_or_else(|| crate::EngineError::NotFound {
            what: "plan (call Controller::plan first)".to_string(),
        })?;

        let cache_ctx = CacheContext {
            cache: &self.cache,
            search_roots: self.collaborators.search_roots.clone(),
            downloader: self.collaborators.downloader,
            layout_destination: None,
            config: &self.config,
        };
        let ctx = ApplyContext { cache: &self.cache, cache_ctx, registry, mutex: self.mutex, scope: self.scope };

        Ok(apply::run(&mut self.state, &plan, &ctx, elevation, prompt, msg_cb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::exe::test_support::FakeProcessExecutor;
    use crate::drivers::exe::ExeDriver;
    use crate::state::package::{Package, PackageKind};
    use crate::sync::InProcessMutex;
    use crate::variables::builtins::test_support::{FakeHostInfo, FakeKnownFolders};

    /// Builds a `Controller` directly, bypassing `Controller::new`'s
    /// section read -- that belongs to `section::reader`'s own test
    /// suite, not this module's detect/plan/apply wiring tests.
    fn test_controller<'a>(
        folders: &'a FakeKnownFolders,
        host: &'a FakeHostInfo,
        cache_dir: &std::path::Path,
        mutex: &'a InProcessMutex,
    ) -> Controller<'a> {
        let mut state = BundleState::new();
        state.packages.push(Package::new(PackageId(1), PackageKind::Exe));
        Controller {
            state,
            collaborators: Collaborators { folders, host, downloader: None, search_roots: Vec::new() },
            cache: CacheManager::at_path(cache_dir.to_path_buf()),
            config: EngineConfig::default(),
            scope: ApplyScope::PerUser,
            mutex,
            activity: ActivityToken::new(),
        }
    }

    #[test]
    fn detect_then_plan_populate_package_state() {
        let dir = tempfile::tempdir().unwrap();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let mutex = InProcessMutex::new();
        let mut controller = test_controller(&folders, &host, &dir.path().join("cache"), &mutex);

        let executor = FakeProcessExecutor::default();
        let driver = ExeDriver::new(&executor, &folders, &host, "setup.exe", "", None, "");
        let mut registry = DriverRegistry::new();
        registry.insert(PackageId(1), &driver);

        controller.detect(&registry).unwrap();
        assert_eq!(controller.state().packages[0].current_state, crate::state::package::CurrentState::Unknown);

        controller.plan(&registry, CommandAction::Install).unwrap();
        assert!(controller.state().plan.is_some());
    }

    #[test]
    fn plan_then_apply_drains_the_plan_through_the_apply_engine() {
        let dir = tempfile::tempdir().unwrap();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let mutex = InProcessMutex::new();
        let mut controller = test_controller(&folders, &host, &dir.path().join("cache"), &mutex);

        let executor = FakeProcessExecutor::default();
        let driver = ExeDriver::new(&executor, &folders, &host, "setup.exe", "", None, "");
        let mut registry = DriverRegistry::new();
        registry.insert(PackageId(1), &driver);

        controller.detect(&registry).unwrap();
        controller.plan(&registry, CommandAction::Install).unwrap();
        let outcome = controller.apply(&registry, None, |_| SourceChoice::Abort, |_, _| UiResponse::Abort).unwrap();
        assert!(outcome.result.is_ok());
    }
}
