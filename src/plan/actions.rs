//! The plan action vocabulary (`spec.md` 3, 4.6): the seven ordered
//! lists a built [`super::Plan`] carries, and the overall command a
//! [`super::builder::PlanBuilder`] plans for.

use std::path::PathBuf;

use crate::drivers::patch::OrderedPatchTarget;
use crate::state::package::{ExecuteAction, PackageId, RequestState, RollbackAction};
use crate::state::{ContainerId, PayloadKey};

use super::ordering::CheckpointId;

/// The overall verb the presentation layer requested, from which each
/// package's default [`RequestState`] is derived when it has not
/// authored an explicit per-package request (`spec.md` 4.6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandAction {
    /// Install every package not already present.
    Install,
    /// Remove every package this bundle owns.
    Uninstall {
        /// Remove even packages another bundle still depends on.
        force: bool,
    },
    /// Reinstall/repair every present package.
    Repair,
    /// Cache only; nothing is executed.
    Cache,
    /// Copy the bundle and its payloads to a destination directory;
    /// nothing is executed.
    Layout {
        /// Destination directory.
        destination: PathBuf,
    },
    /// Per-package requests are authored explicitly; packages with no
    /// explicit request default to no-op.
    Modify,
}

impl CommandAction {
    /// The default per-package [`RequestState`] this command implies
    /// for a package that authored no explicit request of its own.
    #[must_use]
    pub fn default_request(&self) -> RequestState {
        match self {
            Self::Install | Self::Repair => RequestState::Present,
            Self::Uninstall { force: true } => RequestState::ForceAbsent,
            Self::Uninstall { force: false } => RequestState::Absent,
            Self::Cache | Self::Layout { .. } => RequestState::Cache,
            Self::Modify => RequestState::None,
        }
    }

    /// `true` if packages should be iterated in manifest order
    /// (install-like commands) rather than reverse manifest order
    /// (uninstall, which tears down in the opposite order it built up).
    #[must_use]
    pub fn forward_order(&self) -> bool {
        !matches!(self, Self::Uninstall { .. })
    }
}

/// Phase A (cache) action, per `spec.md` 4.7.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheAction {
    /// A rollback/resume boundary the cache thread can be asked to
    /// roll back to.
    Checkpoint(CheckpointId),
    /// Marks the start of one package's cache work, for progress and
    /// package-level retry/ignore scoping.
    PackageStart(PackageId),
    /// Marks the end of one package's cache work.
    PackageStop(PackageId),
    /// Resolves a container to a local path (search roots or
    /// download).
    AcquireContainer(ContainerId),
    /// Streams a container's payloads out via the container reader.
    ExtractContainer(ContainerId),
    /// Copies an acquired container to its layout destination
    /// (`-layout` only).
    LayoutContainer {
        /// Which container.
        container: ContainerId,
        /// Retry attempt number, for logging.
        try_count: u32,
    },
    /// Resolves a payload to a local path.
    AcquirePayload(PayloadKey),
    /// Verifies a located payload's size/hash and moves it into the
    /// content-addressed cache.
    CachePayload(PayloadKey),
    /// Copies a cached payload to its layout destination (`-layout`
    /// only).
    LayoutPayload {
        /// Which payload.
        payload: PayloadKey,
        /// Retry attempt number, for logging.
        try_count: u32,
    },
    /// Copies the bundle image itself (`-layout` only).
    LayoutBundle,
    /// Signals a syncpoint the execute phase may be waiting on
    /// (`spec.md` 4.7/4.9, §8 scenario S8).
    SignalSyncpoint(CheckpointId),
    /// Undoes a package's cache work: removes its cache directory.
    /// Appears only in `rollback_cache_actions`.
    RemovePackageCache(PackageId),
}

/// Phase B (execute) action, per `spec.md` 4.7. Carries both the
/// forward action and its rollback counterpart so
/// [`super::builder::build_rollback_actions`] can derive the reverse
/// list without re-deriving per-package state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutePlanAction {
    /// A rollback/resume boundary the execute loop can be asked to
    /// roll back to.
    Checkpoint(CheckpointId),
    /// Blocks until the cache thread signals this syncpoint, or fails
    /// if the cache thread has already failed (§8 scenario S8).
    WaitSyncpoint(CheckpointId),
    /// Marks a point rollback will not cross uninvited: a vital
    /// boundary aborts the whole apply on rollback; a non-vital one
    /// lets rollback resume forward execution from the next boundary.
    RollbackBoundary {
        /// Boundary identifier.
        id: CheckpointId,
        /// `true` if rollback must stop (and abort) here.
        vital: bool,
    },
    /// Runs one package's driver-computed action.
    ExecutePackage {
        /// Which package.
        package_id: PackageId,
        /// The forward action to run.
        action: ExecuteAction,
        /// The action that undoes it, for the rollback list.
        rollback: RollbackAction,
    },
    /// Registers/unregisters a dependency-provider key the package
    /// owns, adjacent to that package's execute action.
    PackageProvider {
        /// Which package.
        package_id: PackageId,
        /// `true` to register, `false` to unregister.
        register: bool,
    },
    /// Registers/unregisters this bundle as a dependent of another
    /// package's provider key.
    PackageDependency {
        /// Which package.
        package_id: PackageId,
        /// Dependency provider key.
        dependency_key: String,
        /// `true` to register, `false` to unregister.
        register: bool,
    },
    /// Loads a compatible package's prior state ahead of an upgrade.
    CompatiblePackage {
        /// Which package.
        package_id: PackageId,
    },
    /// Applies a merged, ordered sequence of patches to one target
    /// product (`spec.md` 4.5's merge-by-insertion-sort rule, §8
    /// scenario S4). [`super::builder::PlanBuilder::build`] emits
    /// exactly one of these per target product a patch package
    /// detected, merging every patch package that targets the same
    /// product via [`crate::drivers::patch::insert_ordered_target`] --
    /// a product touched by only one patch still goes through this
    /// action, with a single-entry list, so there is one dispatch path
    /// rather than two.
    MspTarget {
        /// The target product code.
        product_code: String,
        /// Per-patch entries, insertion-sorted by detection-time patch
        /// order (`spec.md` 4.5 step 2).
        targets: Vec<MspTargetEntry>,
    },
}

/// One patch package's contribution to a merged [`ExecutePlanAction::MspTarget`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MspTargetEntry {
    /// The patch package this entry runs.
    pub package_id: PackageId,
    /// That package's computed execute action for this product.
    pub action: ExecuteAction,
    /// That package's computed rollback action for this product.
    pub rollback: RollbackAction,
    /// This entry's position in the merged, ordered sequence.
    pub order: OrderedPatchTarget,
}

/// A bundle-level add/remove-from-ARP action, kept as its own list per
/// `spec.md` 3's data model (scheduled ahead of cache/execute work by
/// the caller, not interleaved into either list).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationAction {
    /// Registers the bundle as installed.
    Register,
    /// Removes the bundle's registration.
    Unregister,
}

impl RegistrationAction {
    /// The action that undoes this one.
    #[must_use]
    pub const fn rollback(self) -> Self {
        match self {
            Self::Register => Self::Unregister,
            Self::Unregister => Self::Register,
        }
    }
}

/// Phase C (best-effort cache cleanup) action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CleanAction {
    /// The package whose cache directory should be removed.
    pub package_id: PackageId,
}

/// A related bundle's relaunch, ordered per `spec.md` 4.6's
/// reverse-vs-forward / upgrade-late rules. Actually invoking the
/// related bundle's own engine is outside this crate's scope (an
/// external collaborator per `spec.md` 1); this list records the
/// ordering decision for that external caller to act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelatedBundleAction {
    /// Provider key of the related bundle.
    pub provider_key: String,
    /// Path to relaunch.
    pub bundle_path: PathBuf,
}
