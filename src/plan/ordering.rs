//! Checkpoint identifiers and rollback-boundary partitioning
//! (`spec.md` 4.6/4.7): both phases share one checkpoint id space so a
//! cache-side `Checkpoint` and its execute-side `Checkpoint` name the
//! same resume point.

use super::actions::ExecutePlanAction;

/// A checkpoint/syncpoint identifier, unique within one built
/// [`super::Plan`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointId(pub u32);

/// Hands out increasing [`CheckpointId`]s while a plan is being built.
/// Local to one `PlanBuilder::build` call -- never shared across
/// builds, so ids are only unique within a single plan.
#[derive(Default)]
pub struct CheckpointAllocator {
    next: u32,
}

impl CheckpointAllocator {
    /// Starts a fresh allocator at checkpoint 0.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Allocates the next checkpoint id.
    pub fn next(&mut self) -> CheckpointId {
        let id = CheckpointId(self.next);
        self.next += 1;
        id
    }
}

/// Returns the index of each [`ExecutePlanAction::RollbackBoundary`]
/// in `actions`, in order, for `apply::execute_phase`'s backward walk
/// when a non-vital package fails and rollback only needs to resume
/// forward execution at the next boundary rather than abort outright.
#[must_use]
pub fn boundary_indices(actions: &[ExecutePlanAction]) -> Vec<usize> {
    actions
        .iter()
        .enumerate()
        .filter_map(|(i, a)| matches!(a, ExecutePlanAction::RollbackBoundary { .. }).then_some(i))
        .collect()
}

/// Finds the nearest boundary at or before `from_index`, returning its
/// index and whether it is vital. `None` if no boundary precedes
/// `from_index`, meaning rollback must walk all the way back to the
/// start of the plan.
#[must_use]
pub fn nearest_boundary_at_or_before(
    actions: &[ExecutePlanAction],
    from_index: usize,
) -> Option<(usize, bool)> {
    actions[..=from_index].iter().enumerate().rev().find_map(|(i, a)| {
        if let ExecutePlanAction::RollbackBoundary { vital, .. } = a {
            Some((i, *vital))
        } else {
            None
        }
    })
}
