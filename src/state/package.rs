//! Package records (`spec.md` 3, 4.5).
//!
//! A [`Package`] is a unit of install work: a native-installer
//! product, a patch, an executable, or an OS-update package. Detected
//! state is produced by the matching driver in [`crate::drivers`];
//! `requested` is set by the presentation layer during plan; `execute`
//! and `rollback` are computed deterministically by
//! [`crate::plan::builder`] from `(current_state, requested,
//! kind-specific detection)`.

use std::collections::BTreeMap;

/// Opaque identifier for a package, stable for the life of the engine
/// state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId(pub u32);

/// Which driver (`crate::drivers`) owns this package.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageKind {
    /// A native-installer product package.
    NativeInstaller,
    /// A native-installer patch package.
    Patch,
    /// A bare executable installer.
    Exe,
    /// An operating-system update package.
    OsUpdate,
}

/// Detected installation state of a package, ordered from "more
/// installed" to "less installed" per `spec.md` 4.5's patch-state
/// ordering (`present > superseded > obsolete > cached > absent >
/// unknown`), reused here as the package-wide ordering for every kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CurrentState {
    /// Not yet detected this cycle.
    Unknown,
    /// Detected absent and not superseded/obsoleted by anything
    /// relevant -- lowest "installed-ness" once detection has run.
    Absent,
    /// Cached locally but not installed.
    Cached,
    /// Superseded by a newer patch/product; no longer applicable.
    Obsolete,
    /// Present but superseded by a later patch targeting the same
    /// product.
    Superseded,
    /// Installed and current.
    Present,
}

/// What the presentation layer requested for a package during plan,
/// per `spec.md` 4.6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RequestState {
    /// No explicit request; plan derives a default from the command
    /// action.
    #[default]
    None,
    /// Force removal even if other bundles still depend on it.
    ForceAbsent,
    /// Request the package be absent (uninstalled).
    Absent,
    /// Request the package be cached but not installed.
    Cache,
    /// Request the package be present (installed).
    Present,
    /// Request repair of an already-present package.
    Repair,
}

/// The computed action a package's execute entry will perform,
/// per `spec.md` 3's invariant that `execute`/`rollback` are derived
/// deterministically from `(current_state, requested, kind-specific
/// detection)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExecuteAction {
    /// No action -- stripped from the finalized plan.
    #[default]
    None,
    /// Install / add the package.
    Install,
    /// Uninstall / remove the package.
    Uninstall,
    /// Repair an already-present package.
    Repair,
    /// Minor upgrade in place.
    MinorUpgrade,
    /// Major upgrade (remove old, install new).
    MajorUpgrade,
    /// Apply a patch.
    Patch,
}

/// The rollback counterpart of an [`ExecuteAction`], run in reverse on
/// failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RollbackAction {
    /// No rollback action.
    #[default]
    None,
    /// Uninstall what `execute` installed.
    Uninstall,
    /// Re-install what `execute` uninstalled.
    Install,
    /// Remove the patch `execute` applied.
    Unpatch,
}

/// Per-target detected state for a patch package (`spec.md` 4.5),
/// keyed by the target product's provider key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchTargetState {
    /// The patch is applied to this target.
    Present,
    /// The patch is applied but superseded by a later patch on the
    /// same target.
    Superseded,
    /// The patch does not apply / is obsolete for this target.
    Obsolete,
    /// The patch is not applied to this target.
    Absent,
}

/// Per-cycle kind-specific detected state, populated by the matching
/// driver's `detect` and consumed by its `plan`.
#[derive(Clone, Debug, Default)]
pub enum DetectedState {
    /// No kind-specific detail recorded (exe/os-update packages, or
    /// not yet detected).
    #[default]
    None,
    /// Native-installer feature states, keyed by feature name.
    NativeInstaller {
        /// Per-feature action recorded during detect, used by the
        /// feature-level state machine in `drivers::native_installer`.
        features: BTreeMap<String, String>,
    },
    /// Patch per-target detected states, in the detection-time order
    /// the installer returned (`spec.md` 4.5 step 2), which later
    /// drives the merge-by-insertion-sort planning rule.
    Patch {
        /// Ordered `(target product provider key, detected state,
        /// patch order)` triples.
        targets: Vec<(String, PatchTargetState, u32)>,
    },
}

impl DetectedState {
    /// Resets to the empty state before a new detect pass.
    pub fn clear(&mut self) {
        *self = Self::None;
    }
}

/// A unit of install work.
pub struct Package {
    /// Stable identifier.
    pub id: PackageId,
    /// Which driver owns this package.
    pub kind: PackageKind,
    /// `true` if this package installs machine-wide rather than
    /// per-user.
    pub per_machine: bool,
    /// `true` if a failure executing this package should abort the
    /// apply rather than being ignorable.
    pub vital: bool,
    /// `true` if this package kind supports uninstall.
    pub uninstallable: bool,
    /// Content-addressed cache id, once the cache phase has assigned
    /// one.
    pub cache_id: Option<String>,
    /// Dependency-provider keys this package registers, for
    /// reference-counting across bundles.
    pub providers: Vec<String>,
    /// Explicit target-product provider keys authored on a patch
    /// package (`spec.md` 4.5 step 1a). Empty for non-patch kinds.
    pub patch_targets: Vec<String>,
    /// Upgrade code used to discover related target products for a
    /// patch package when `patch_targets` is empty (`spec.md` 4.5 step
    /// 1b). `None` for non-patch kinds.
    pub upgrade_code: Option<String>,
    /// Authored boolean condition evaluated over the variable store to
    /// detect an `Exe` package's presence (`spec.md` 4.5: "detection
    /// evaluates an authored boolean condition over variables").
    /// `None` for kinds that detect some other way.
    pub detect_condition: Option<String>,
    /// Detected installation state, set exactly once per apply-cycle
    /// by detect.
    pub current_state: CurrentState,
    /// What the presentation layer requested during plan.
    pub requested: RequestState,
    /// Kind-specific detected detail.
    pub detected: DetectedState,
    /// The computed execute action.
    pub execute: ExecuteAction,
    /// The computed rollback action.
    pub rollback: RollbackAction,
    /// `true` if the dependency manager determined this package is
    /// "still needed" by another bundle, downgrading a requested
    /// `absent` to `none` per `spec.md` 4.6.
    pub still_needed: bool,
}

impl Package {
    /// Creates a package with no detected or planned state yet.
    #[must_use]
    pub fn new(id: PackageId, kind: PackageKind) -> Self {
        Self {
            id,
            kind,
            per_machine: false,
            vital: true,
            uninstallable: true,
            cache_id: None,
            providers: Vec::new(),
            patch_targets: Vec::new(),
            upgrade_code: None,
            detect_condition: None,
            current_state: CurrentState::Unknown,
            requested: RequestState::None,
            detected: DetectedState::None,
            execute: ExecuteAction::None,
            rollback: RollbackAction::None,
            still_needed: false,
        }
    }
}
