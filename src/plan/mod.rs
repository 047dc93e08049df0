//! Plan (C10, `spec.md` 4.6/4.8): the result of the `plan` verb, a
//! fully-ordered, immutable set of actions the apply engine (C11)
//! executes without further decision-making of its own.

pub mod actions;
pub mod builder;
pub mod ordering;

pub use actions::{
    CacheAction, CleanAction, CommandAction, ExecutePlanAction, RegistrationAction,
    RelatedBundleAction,
};
pub use builder::PlanBuilder;
pub use ordering::CheckpointId;

/// A fully-ordered plan of action, built once by [`PlanBuilder::build`]
/// and then replayed verbatim by the apply engine. Every list is
/// immutable once built: apply consumes it by index, never rewrites
/// it, so `plan` then `apply` is reproducible (`spec.md` 8 property
/// 5).
#[derive(Clone, Debug, Default)]
pub struct Plan {
    /// Phase A (cache) actions, run on the cache thread.
    pub cache_actions: Vec<CacheAction>,
    /// Undo actions for `cache_actions`, run if a later cache action
    /// fails.
    pub rollback_cache_actions: Vec<CacheAction>,
    /// Phase B (execute) actions, run on the controller thread.
    pub execute_actions: Vec<ExecutePlanAction>,
    /// Undo actions for `execute_actions`, run in reverse if a vital
    /// package fails.
    pub rollback_actions: Vec<ExecutePlanAction>,
    /// Phase C (best-effort) cache cleanup actions.
    pub clean_actions: Vec<CleanAction>,
    /// Bundle-level ARP registration actions, run ahead of both
    /// phases.
    pub registration_actions: Vec<RegistrationAction>,
    /// Undo actions for `registration_actions`.
    pub rollback_registration_actions: Vec<RegistrationAction>,
    /// Related-bundle relaunch ordering, for the external caller that
    /// owns cross-bundle orchestration.
    pub related_bundle_actions: Vec<RelatedBundleAction>,
}
