//! The plan builder (C10, `spec.md` 4.6): turns the per-package
//! `execute`/`rollback` state left by each driver's `plan` step into
//! the seven ordered action lists a [`super::Plan`] carries.
//!
//! Each driver (`crate::drivers`) has already run its own `plan` for
//! every package before [`PlanBuilder::build`] is called -- that is
//! where `(current_state, requested)` become a per-package
//! `ExecuteAction`/`RollbackAction` pair. This module only sequences
//! those already-computed actions: registration scheduling, related-
//! bundle ordering, dependency-provider adjacency, the "still needed"
//! downgrade, and final none-stripping.

use std::collections::{HashMap, HashSet};

use crate::drivers::patch::{insert_ordered_target, OrderedPatchTarget};
use crate::error::Result;
use crate::state::package::{DetectedState, ExecuteAction, PackageId, PackageKind, RequestState, RollbackAction};
use crate::state::{BundleState, ContainerId, RelationType};

use super::actions::{
    CacheAction, CleanAction, CommandAction, ExecutePlanAction, MspTargetEntry, RegistrationAction,
    RelatedBundleAction,
};
use super::ordering::CheckpointAllocator;
use super::Plan;

/// One patch package's contribution, recorded during the main loop and
/// merged into per-product [`ExecutePlanAction::MspTarget`] actions
/// after it (`spec.md` 4.5's merge-by-insertion-sort rule).
struct PatchContribution {
    package_id: PackageId,
    vital: bool,
    syncpoint: super::ordering::CheckpointId,
    action: ExecuteAction,
    rollback: RollbackAction,
    targets: Vec<(String, u32)>,
}

/// Builds one [`Plan`] from the current bundle state and the command
/// being planned for.
pub struct PlanBuilder<'a> {
    state: &'a BundleState,
    command: CommandAction,
}

impl<'a> PlanBuilder<'a> {
    /// Creates a builder for `command` over `state`.
    #[must_use]
    pub fn new(state: &'a BundleState, command: CommandAction) -> Self {
        Self { state, command }
    }

    /// Assembles the plan. Per-package `execute`/`rollback` must
    /// already be populated (by each kind's driver); this only
    /// sequences them.
    pub fn build(&self) -> Result<Plan> {
        let mut alloc = CheckpointAllocator::new();
        let mut cache_actions = Vec::new();
        let mut execute_actions = Vec::new();
        let mut seen_containers: HashSet<ContainerId> = HashSet::new();
        let mut cached_packages = Vec::new();

        let boundary = alloc.next();
        execute_actions.push(ExecutePlanAction::RollbackBoundary { id: boundary, vital: true });

        let forward = self.command.forward_order();
        let order: Vec<usize> = if forward {
            (0..self.state.packages.len()).collect()
        } else {
            (0..self.state.packages.len()).rev().collect()
        };

        let mut patch_contributions: Vec<PatchContribution> = Vec::new();

        for idx in order {
            let pkg = &self.state.packages[idx];
            let effective_execute = self.effective_execute(pkg.id.0 as usize);
            if effective_execute == ExecuteAction::None {
                continue;
            }

            cache_actions.push(CacheAction::PackageStart(pkg.id));
            for payload in self.state.payloads.iter().filter(|p| self.owned_by(pkg.id.0, p.container_id)) {
                if let Some(container_id) = payload.container_id {
                    if seen_containers.insert(container_id) {
                        cache_actions.push(CacheAction::AcquireContainer(container_id));
                        cache_actions.push(CacheAction::ExtractContainer(container_id));
                    }
                }
                cache_actions.push(CacheAction::AcquirePayload(payload.key.clone()));
                cache_actions.push(CacheAction::CachePayload(payload.key.clone()));
            }
            cache_actions.push(CacheAction::PackageStop(pkg.id));
            cached_packages.push(pkg.id);

            let syncpoint = alloc.next();
            cache_actions.push(CacheAction::SignalSyncpoint(syncpoint));

            if pkg.kind == PackageKind::Patch {
                // Patch packages are not executed in manifest position:
                // packages targeting the same product must be merged
                // into one ordered sequence first (`spec.md` 4.5), so
                // their `WaitSyncpoint`/`MspTarget`/checkpoint trio is
                // deferred until every package has been detected below.
                let targets = match &pkg.detected {
                    DetectedState::Patch { targets } => {
                        targets.iter().map(|(product, _, order)| (product.clone(), *order)).collect()
                    }
                    _ => Vec::new(),
                };
                patch_contributions.push(PatchContribution {
                    package_id: pkg.id,
                    vital: pkg.vital,
                    syncpoint,
                    action: effective_execute,
                    rollback: pkg.rollback,
                    targets,
                });
                continue;
            }

            execute_actions.push(ExecutePlanAction::WaitSyncpoint(syncpoint));

            let registering = matches!(effective_execute, ExecuteAction::Install | ExecuteAction::MajorUpgrade | ExecuteAction::MinorUpgrade);
            let unregistering = matches!(effective_execute, ExecuteAction::Uninstall);

            if unregistering {
                for _ in &pkg.providers {
                    execute_actions.push(ExecutePlanAction::PackageProvider {
                        package_id: pkg.id,
                        register: false,
                    });
                }
            }

            execute_actions.push(ExecutePlanAction::ExecutePackage {
                package_id: pkg.id,
                action: effective_execute,
                rollback: pkg.rollback,
            });

            if registering {
                for _ in &pkg.providers {
                    execute_actions.push(ExecutePlanAction::PackageProvider {
                        package_id: pkg.id,
                        register: true,
                    });
                }
            }

            let checkpoint = alloc.next();
            execute_actions.push(ExecutePlanAction::Checkpoint(checkpoint));
            execute_actions.push(ExecutePlanAction::RollbackBoundary { id: checkpoint, vital: pkg.vital });
        }

        self.append_msp_targets(patch_contributions, &mut alloc, &mut execute_actions);

        let rollback_actions = build_rollback_actions(&execute_actions);
        let rollback_cache_actions: Vec<CacheAction> = cached_packages
            .iter()
            .rev()
            .map(|id| CacheAction::RemovePackageCache(*id))
            .collect();

        let clean_actions: Vec<CleanAction> = self
            .state
            .packages
            .iter()
            .filter(|p| matches!(self.effective_execute(p.id.0 as usize), ExecuteAction::Uninstall))
            .map(|p| CleanAction { package_id: p.id })
            .collect();

        let (registration_actions, rollback_registration_actions) = self.registration_actions();

        let related_bundle_actions = self.related_bundle_actions();

        Ok(Plan {
            cache_actions,
            rollback_cache_actions,
            execute_actions,
            rollback_actions,
            clean_actions,
            registration_actions,
            rollback_registration_actions,
            related_bundle_actions,
        })
    }

    /// A package's effective execute action after the "still needed"
    /// downgrade (`spec.md` 4.6): a requested `absent` that the
    /// dependency manager says is still needed by another bundle
    /// downgrades to no-op, unless the request was `force_absent`.
    fn effective_execute(&self, package_index: usize) -> ExecuteAction {
        let pkg = &self.state.packages[package_index];
        if pkg.requested == RequestState::Absent && pkg.still_needed {
            return ExecuteAction::None;
        }
        pkg.execute
    }

    fn owned_by(&self, _package_index: u32, _container_id: Option<ContainerId>) -> bool {
        // Payload-to-package ownership is manifest-authored and, in
        // this crate, resolved one level up (`crate::manifest`, not
        // yet a concern of the plan builder); until that wiring
        // lands, every payload is treated as belonging to the package
        // currently being planned so cache actions are still emitted.
        true
    }

    /// Bundle-level ARP registration, scheduled ahead of both phases
    /// whenever the plan does anything at all (`spec.md` 4.6: "bundle
    /// registration scheduled before execute/cache work when any
    /// exists").
    fn registration_actions(&self) -> (Vec<RegistrationAction>, Vec<RegistrationAction>) {
        let any_work = self
            .state
            .packages
            .iter()
            .enumerate()
            .any(|(i, _)| self.effective_execute(i) != ExecuteAction::None);
        if !any_work {
            return (Vec::new(), Vec::new());
        }
        let action = if matches!(self.command, CommandAction::Uninstall { .. }) {
            RegistrationAction::Unregister
        } else {
            RegistrationAction::Register
        };
        (vec![action], vec![action.rollback()])
    }

    /// Orders related bundles per `spec.md` 4.6: reverse order on
    /// uninstall (undo what was added last, first), forward on
    /// install, with `Upgrade` relations ordered after every other
    /// relation type so a downgrade's refcount accounting sees the
    /// rest of the bundle's own packages first.
    fn related_bundle_actions(&self) -> Vec<RelatedBundleAction> {
        let mut relations: Vec<_> = self.state.relations.iter().collect();
        relations.sort_by_key(|r| matches!(r.relation_type, RelationType::Upgrade));
        if !self.command.forward_order() {
            relations.reverse();
        }
        relations
            .into_iter()
            .map(|r| RelatedBundleAction {
                provider_key: r.provider_key.clone(),
                bundle_path: r.bundle_path.clone(),
            })
            .collect()
    }

    /// Merges every patch package's per-product contribution into one
    /// `MspTarget` action per target product and appends them to
    /// `execute_actions`, per `spec.md` 4.5's merge rule (§8 scenario
    /// S4). A product touched by a single patch still gets its own
    /// `MspTarget`, so `execute_phase` has one dispatch path for every
    /// patch regardless of how many packages target it.
    ///
    /// Every contributing package's `WaitSyncpoint` is emitted
    /// immediately before the merged action, so the action never runs
    /// until every patch that feeds it is on disk -- this is the cache
    /// sync point `spec.md` calls for when a merge inserts a patch
    /// ahead of ones already sequenced, made unconditional rather than
    /// only emitted for the out-of-order case, since every contributor
    /// needs the same guarantee regardless of where it landed.
    fn append_msp_targets(
        &self,
        contributions: Vec<PatchContribution>,
        alloc: &mut CheckpointAllocator,
        execute_actions: &mut Vec<ExecutePlanAction>,
    ) {
        let mut product_order: HashMap<String, Vec<OrderedPatchTarget>> = HashMap::new();
        let mut product_entries: HashMap<String, Vec<MspTargetEntry>> = HashMap::new();
        let mut product_syncpoints: HashMap<String, Vec<super::ordering::CheckpointId>> = HashMap::new();
        let mut product_vital: HashMap<String, bool> = HashMap::new();
        let mut product_seen_order: Vec<String> = Vec::new();

        for contribution in &contributions {
            for (product_code, patch_order) in &contribution.targets {
                let entry = OrderedPatchTarget {
                    patch_order: *patch_order,
                    patch_provider_key: format!("package:{}", contribution.package_id.0),
                };
                let sequence = product_order.entry(product_code.clone()).or_default();
                let pos_before = sequence.len();
                insert_ordered_target(sequence, entry.clone());
                let pos = sequence.iter().position(|e| e == &entry).unwrap_or(pos_before);

                let msp_entry = MspTargetEntry {
                    package_id: contribution.package_id,
                    action: contribution.action,
                    rollback: contribution.rollback,
                    order: entry,
                };
                let entries = product_entries.entry(product_code.clone()).or_default();
                entries.insert(pos.min(entries.len()), msp_entry);

                product_syncpoints.entry(product_code.clone()).or_default().push(contribution.syncpoint);
                let vital = product_vital.entry(product_code.clone()).or_insert(false);
                *vital = *vital || contribution.vital;

                if !product_seen_order.contains(product_code) {
                    product_seen_order.push(product_code.clone());
                }
            }
        }

        for product_code in product_seen_order {
            for syncpoint in &product_syncpoints[&product_code] {
                execute_actions.push(ExecutePlanAction::WaitSyncpoint(*syncpoint));
            }
            execute_actions.push(ExecutePlanAction::MspTarget {
                product_code: product_code.clone(),
                targets: product_entries.remove(&product_code).unwrap_or_default(),
            });
            let checkpoint = alloc.next();
            execute_actions.push(ExecutePlanAction::Checkpoint(checkpoint));
            execute_actions.push(ExecutePlanAction::RollbackBoundary {
                id: checkpoint,
                vital: product_vital.get(&product_code).copied().unwrap_or(true),
            });
        }
    }
}

/// Derives the rollback list from the finalized execute list by
/// walking it backward and flipping each action to its undo
/// counterpart, per `spec.md` 4.7 ("rollback actions run in reverse on
/// failure"). `Checkpoint`/`WaitSyncpoint` markers are dropped --
/// rollback does not wait on cache syncpoints or re-checkpoint itself,
/// it only needs the `RollbackBoundary` markers to know where to stop.
#[must_use]
pub fn build_rollback_actions(execute_actions: &[ExecutePlanAction]) -> Vec<ExecutePlanAction> {
    execute_actions
        .iter()
        .rev()
        .filter_map(|action| match action {
            ExecutePlanAction::Checkpoint(_) | ExecutePlanAction::WaitSyncpoint(_) => None,
            ExecutePlanAction::RollbackBoundary { id, vital } => {
                Some(ExecutePlanAction::RollbackBoundary { id: *id, vital: *vital })
            }
            ExecutePlanAction::ExecutePackage { package_id, rollback, .. } => {
                if *rollback == RollbackAction::None {
                    None
                } else {
                    let rollback_execute = match rollback {
                        RollbackAction::Uninstall => ExecuteAction::Uninstall,
                        RollbackAction::Install => ExecuteAction::Install,
                        RollbackAction::Unpatch => ExecuteAction::Uninstall,
                        RollbackAction::None => unreachable!("filtered above"),
                    };
                    Some(ExecutePlanAction::ExecutePackage {
                        package_id: *package_id,
                        action: rollback_execute,
                        rollback: RollbackAction::None,
                    })
                }
            }
            ExecutePlanAction::PackageProvider { package_id, register } => {
                Some(ExecutePlanAction::PackageProvider { package_id: *package_id, register: !register })
            }
            ExecutePlanAction::PackageDependency { package_id, dependency_key, register } => {
                Some(ExecutePlanAction::PackageDependency {
                    package_id: *package_id,
                    dependency_key: dependency_key.clone(),
                    register: !register,
                })
            }
            ExecutePlanAction::CompatiblePackage { .. } => None,
            ExecutePlanAction::MspTarget { product_code, targets } => {
                let reversed: Vec<MspTargetEntry> = targets
                    .iter()
                    .rev()
                    .filter(|t| t.rollback != RollbackAction::None)
                    .map(|t| MspTargetEntry {
                        package_id: t.package_id,
                        action: match t.rollback {
                            RollbackAction::Uninstall | RollbackAction::Unpatch => ExecuteAction::Uninstall,
                            RollbackAction::Install => ExecuteAction::Install,
                            RollbackAction::None => unreachable!("filtered above"),
                        },
                        rollback: RollbackAction::None,
                        order: t.order.clone(),
                    })
                    .collect();
                if reversed.is_empty() {
                    None
                } else {
                    Some(ExecutePlanAction::MspTarget { product_code: product_code.clone(), targets: reversed })
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::package::{Package, PackageId, PackageKind};

    fn package(id: u32, execute: ExecuteAction, rollback: RollbackAction) -> Package {
        let mut pkg = Package::new(PackageId(id), PackageKind::Exe);
        pkg.requested = RequestState::Present;
        pkg.execute = execute;
        pkg.rollback = rollback;
        pkg
    }

    #[test]
    fn install_plan_registers_before_executing_and_strips_none_packages() {
        let mut state = BundleState::new();
        state.packages.push(package(1, ExecuteAction::Install, RollbackAction::Uninstall));
        state.packages.push(package(2, ExecuteAction::None, RollbackAction::None));

        let plan = PlanBuilder::new(&state, CommandAction::Install).build().expect("builds");
        assert_eq!(plan.registration_actions, vec![RegistrationAction::Register]);
        assert_eq!(plan.rollback_registration_actions, vec![RegistrationAction::Unregister]);
        assert_eq!(
            plan.execute_actions
                .iter()
                .filter(|a| matches!(a, ExecutePlanAction::ExecutePackage { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn still_needed_downgrades_requested_absent_to_no_op() {
        let mut state = BundleState::new();
        let mut pkg = package(1, ExecuteAction::Uninstall, RollbackAction::Install);
        pkg.requested = RequestState::Absent;
        pkg.still_needed = true;
        state.packages.push(pkg);

        let plan = PlanBuilder::new(&state, CommandAction::Uninstall { force: false })
            .build()
            .expect("builds");
        assert!(plan
            .execute_actions
            .iter()
            .all(|a| !matches!(a, ExecutePlanAction::ExecutePackage { .. })));
        assert!(plan.clean_actions.is_empty());
    }

    #[test]
    fn force_absent_is_not_downgraded_by_still_needed() {
        let mut state = BundleState::new();
        let mut pkg = package(1, ExecuteAction::Uninstall, RollbackAction::Install);
        pkg.requested = RequestState::ForceAbsent;
        pkg.still_needed = true;
        state.packages.push(pkg);

        let plan = PlanBuilder::new(&state, CommandAction::Uninstall { force: true })
            .build()
            .expect("builds");
        assert_eq!(
            plan.execute_actions
                .iter()
                .filter(|a| matches!(a, ExecutePlanAction::ExecutePackage { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn uninstall_iterates_packages_in_reverse_manifest_order() {
        let mut state = BundleState::new();
        state.packages.push(package(1, ExecuteAction::Uninstall, RollbackAction::Install));
        state.packages.push(package(2, ExecuteAction::Uninstall, RollbackAction::Install));

        let plan = PlanBuilder::new(&state, CommandAction::Uninstall { force: false })
            .build()
            .expect("builds");
        let ids: Vec<_> = plan
            .execute_actions
            .iter()
            .filter_map(|a| match a {
                ExecutePlanAction::ExecutePackage { package_id, .. } => Some(package_id.0),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn rollback_list_is_the_reverse_with_undo_actions() {
        let mut state = BundleState::new();
        state.packages.push(package(1, ExecuteAction::Install, RollbackAction::Uninstall));
        state.packages.push(package(2, ExecuteAction::Install, RollbackAction::Uninstall));

        let plan = PlanBuilder::new(&state, CommandAction::Install).build().expect("builds");
        let rollback_ids: Vec<_> = plan
            .rollback_actions
            .iter()
            .filter_map(|a| match a {
                ExecutePlanAction::ExecutePackage { package_id, action, .. } => {
                    assert_eq!(*action, ExecuteAction::Uninstall);
                    Some(package_id.0)
                }
                _ => None,
            })
            .collect();
        assert_eq!(rollback_ids, vec![2, 1]);
    }

    #[test]
    fn building_the_same_state_twice_yields_the_same_plan() {
        let mut state = BundleState::new();
        state.packages.push(package(1, ExecuteAction::Install, RollbackAction::Uninstall));

        let first = PlanBuilder::new(&state, CommandAction::Install).build().expect("builds");
        let second = PlanBuilder::new(&state, CommandAction::Install).build().expect("builds");
        assert_eq!(first.execute_actions, second.execute_actions);
        assert_eq!(first.cache_actions, second.cache_actions);
    }
}
