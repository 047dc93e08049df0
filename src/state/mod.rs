//! In-memory bundle state (`spec.md` 3).
//!
//! [`BundleState`] is the one piece of "global mutable per-process
//! state" the source engine keeps as a singleton (`spec.md` 9). Here
//! it is an explicit value owned by `main` (via
//! [`crate::controller::Controller`]) and borrowed by each verb --
//! never a `static`. It holds the variable store, the container/
//! payload/package/relation tables, the current plan (once built), the
//! companion pipe connection, and the section descriptor read from the
//! running image.
//!
//! Containers and payloads are never removed once detected; packages
//! are never removed. Only their per-cycle state fields are reset by
//! [`BundleState::detect_reset`] and [`BundleState::plan_reset`] before
//! each new detect/plan pass, per `spec.md` 3's Lifecycle rule.

pub mod container;
pub mod package;
pub mod payload;
pub mod relation;

pub use container::{Container, ContainerId, Packaging};
pub use package::{
    CurrentState, ExecuteAction, Package, PackageId, PackageKind, RequestState, RollbackAction,
};
pub use payload::{CacheStatus, Payload, PayloadKey};
pub use relation::{Relation, RelationType};

use crate::plan::Plan;
use crate::section::SectionDescriptor;
use crate::variables::VariableStore;

/// The complete in-memory state of one bundle engine instance.
pub struct BundleState {
    /// The process-wide name -> value store (C3).
    pub variables: VariableStore,
    /// The section descriptor read from the running image (C4), if it
    /// has been parsed yet. `None` before `Controller` performs its
    /// startup section read.
    pub section: Option<SectionDescriptor>,
    /// Attached/external containers declared by the manifest.
    pub containers: Vec<Container>,
    /// Payloads declared by the manifest, each owned by at most one
    /// container.
    pub payloads: Vec<Payload>,
    /// Installable packages declared by the manifest, in manifest
    /// order (the order package execute actions default to).
    pub packages: Vec<Package>,
    /// Related bundles already on the machine (upgrade/addon/patch/
    /// detect/dependent/update relations), in declaration order.
    pub relations: Vec<Relation>,
    /// The plan built by the most recent `plan` verb, if any.
    pub plan: Option<Plan>,
}

impl BundleState {
    /// Creates an empty bundle state with a fresh, empty variable
    /// store. Manifest loading (an external collaborator per
    /// `spec.md` 1) is expected to populate `containers`, `payloads`,
    /// `packages`, and `relations` afterward.
    #[must_use]
    pub fn new() -> Self {
        Self {
            variables: VariableStore::new(),
            section: None,
            containers: Vec::new(),
            payloads: Vec::new(),
            packages: Vec::new(),
            relations: Vec::new(),
            plan: None,
        }
    }

    /// Looks up a container by id.
    #[must_use]
    pub fn container(&self, id: ContainerId) -> Option<&Container> {
        self.containers.iter().find(|c| c.id == id)
    }

    /// Looks up a package by id.
    #[must_use]
    pub fn package(&self, id: PackageId) -> Option<&Package> {
        self.packages.iter().find(|p| p.id == id)
    }

    /// Looks up a package by id, mutably.
    pub fn package_mut(&mut self, id: PackageId) -> Option<&mut Package> {
        self.packages.iter_mut().find(|p| p.id == id)
    }

    /// Resets every package's per-cycle detect state before a new
    /// `detect` pass, per `spec.md` 3's Lifecycle rule: "only their
    /// per-cycle state fields are reset ... before each new
    /// detect/plan."
    pub fn detect_reset(&mut self) {
        for pkg in &mut self.packages {
            pkg.current_state = CurrentState::Unknown;
            pkg.detected.clear();
        }
        self.plan = None;
    }

    /// Resets every package's per-cycle plan state before a new `plan`
    /// pass.
    pub fn plan_reset(&mut self) {
        for pkg in &mut self.packages {
            pkg.execute = ExecuteAction::None;
            pkg.rollback = RollbackAction::None;
        }
        self.plan = None;
    }
}

impl Default for BundleState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_reset_clears_current_state_but_keeps_packages() {
        let mut state = BundleState::new();
        state.packages.push(Package::new(PackageId(1), PackageKind::Exe));
        state.packages[0].current_state = CurrentState::Present;
        state.detect_reset();
        assert_eq!(state.packages.len(), 1);
        assert_eq!(state.packages[0].current_state, CurrentState::Unknown);
    }

    #[test]
    fn plan_reset_clears_execute_actions_but_keeps_current_state() {
        let mut state = BundleState::new();
        state.packages.push(Package::new(PackageId(1), PackageKind::Exe));
        state.packages[0].current_state = CurrentState::Present;
        state.packages[0].execute = ExecuteAction::Install;
        state.plan_reset();
        assert_eq!(state.packages[0].current_state, CurrentState::Present);
        assert_eq!(state.packages[0].execute, ExecuteAction::None);
    }
}
