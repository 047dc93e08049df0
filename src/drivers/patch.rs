//! Patch driver (`spec.md` 4.5) -- the hard part. Implements the
//! three-step detection algorithm and the merge-by-insertion-sort
//! planning rule exactly as specified (§8 scenario S4, §9's "last
//! write wins" / "extract-size counted once" notes are implemented as
//! specified, not reinterpreted).

use std::collections::BTreeSet;

use crate::elevation::RestartState;
use crate::error::Result;
use crate::state::package::{
    CurrentState, DetectedState, ExecuteAction, Package, PatchTargetState, RequestState, RollbackAction,
};
use crate::variables::VariableStore;

use super::traits::{merge_restart, PackageDriver, PackageState, ProgressMessage, UiResponse};

/// Queries the real installer backend's patch-applicability and
/// patch-state machinery. Production code supplies a real
/// native-installer integration; tests supply an in-memory fake.
pub trait PatchDatabase: Send + Sync {
    /// Enumerates products related to `upgrade_code` (step 1b).
    ///
    /// # Errors
    /// Any [`crate::EngineError`] describing a query failure.
    fn enumerate_related_products(&self, upgrade_code: &str) -> Result<Vec<String>>;

    /// Enumerates every installed product on the machine, used as the
    /// candidate-target fallback when no explicit targets or upgrade
    /// code are authored (step 1's fallback clause).
    ///
    /// # Errors
    /// Any [`crate::EngineError`] describing a query failure.
    fn enumerate_all_installed_products(&self) -> Result<Vec<String>>;

    /// Batched applicability query (step 2): of `candidate_products`,
    /// returns the subset this patch applies to, each with the
    /// installer-assigned sequence order. A product with a "bad
    /// configuration" error is omitted, not failed.
    ///
    /// # Errors
    /// Any [`crate::EngineError`] describing a query failure.
    fn query_applicability(&self, patch_code: &str, candidate_products: &[String]) -> Result<Vec<(String, u32)>>;

    /// Reads this patch's state against one target product (step 3).
    ///
    /// # Errors
    /// Any [`crate::EngineError`] describing a query failure.
    fn query_patch_state(&self, patch_code: &str, product_code: &str) -> Result<PatchTargetState>;

    /// Performs the real patch/unpatch against one target product.
    ///
    /// # Errors
    /// Any [`crate::EngineError`] describing why execution failed.
    fn apply_patch(
        &self,
        patch_code: &str,
        product_code: &str,
        action: ExecuteAction,
    ) -> Result<RestartState>;
}

fn target_rank(state: PatchTargetState) -> u8 {
    match state {
        PatchTargetState::Present => 4,
        PatchTargetState::Superseded => 3,
        PatchTargetState::Obsolete => 2,
        PatchTargetState::Absent => 1,
    }
}

fn target_to_current_state(state: PatchTargetState) -> CurrentState {
    match state {
        PatchTargetState::Present => CurrentState::Present,
        PatchTargetState::Superseded => CurrentState::Superseded,
        PatchTargetState::Obsolete => CurrentState::Obsolete,
        PatchTargetState::Absent => CurrentState::Absent,
    }
}

/// One patch's position in a product's merged execution sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderedPatchTarget {
    /// The installer-assigned sequence order from detection (step 2).
    pub patch_order: u32,
    /// Provider key of the patch package.
    pub patch_provider_key: String,
}

/// Inserts `entry` into `sequence` (already ordered by `patch_order`)
/// via insertion sort, per `spec.md` 4.5's merge rule. Returns `true`
/// if the insertion landed before the current end -- the caller must
/// then insert a cache-sync-point immediately before it, so the
/// newly-merged patch is guaranteed present on disk before any target
/// product reconfiguration downstream of the insertion point.
pub fn insert_ordered_target(sequence: &mut Vec<OrderedPatchTarget>, entry: OrderedPatchTarget) -> bool {
    let pos = sequence.partition_point(|e| e.patch_order < entry.patch_order);
    let needs_syncpoint = pos < sequence.len();
    sequence.insert(pos, entry);
    needs_syncpoint
}

/// The patch [`PackageDriver`], bound to the patch code it governs.
pub struct PatchDriver<'a> {
    database: &'a dyn PatchDatabase,
    patch_code: String,
}

impl<'a> PatchDriver<'a> {
    /// Creates a driver bound to one patch code.
    #[must_use]
    pub fn new(database: &'a dyn PatchDatabase, patch_code: impl Into<String>) -> Self {
        Self { database, patch_code: patch_code.into() }
    }

    fn candidate_targets(&self, pkg: &Package) -> Result<Vec<String>> {
        let mut candidates: BTreeSet<String> = pkg.patch_targets.iter().cloned().collect();
        if let Some(upgrade_code) = &pkg.upgrade_code {
            for related in self.database.enumerate_related_products(upgrade_code)? {
                candidates.insert(related);
            }
        }
        if candidates.is_empty() {
            candidates.extend(self.database.enumerate_all_installed_products()?);
        }
        Ok(candidates.into_iter().collect())
    }
}

impl PackageDriver for PatchDriver<'_> {
    fn detect(&self, pkg: &Package, _vars: &VariableStore) -> Result<PackageState> {
        let candidates = self.candidate_targets(pkg)?;
        let applicable = self.database.query_applicability(&self.patch_code, &candidates)?;

        let mut targets = Vec::with_capacity(applicable.len());
        for (product_code, order) in applicable {
            let state = self.database.query_patch_state(&self.patch_code, &product_code)?;
            targets.push((product_code, state, order));
        }

        let current = targets
            .iter()
            .map(|(_, state, _)| *state)
            .min_by_key(|state| target_rank(*state))
            .map_or(CurrentState::Absent, target_to_current_state);

        Ok(PackageState { current, detected: DetectedState::Patch { targets } })
    }

    fn plan(&self, pkg: &Package, action: RequestState) -> Result<(ExecuteAction, RollbackAction)> {
        let DetectedState::Patch { targets } = &pkg.detected else {
            return Ok((ExecuteAction::None, RollbackAction::None));
        };
        let mut best: Option<(ExecuteAction, RollbackAction)> = None;
        for (_, state, _) in targets {
            let pair = match (*state, action) {
                (PatchTargetState::Absent | PatchTargetState::Obsolete, RequestState::Present) => {
                    (ExecuteAction::Patch, RollbackAction::Unpatch)
                }
                (
                    PatchTargetState::Present | PatchTargetState::Superseded,
                    RequestState::Absent | RequestState::ForceAbsent,
                ) => (ExecuteAction::Uninstall, RollbackAction::Install),
                _ => (ExecuteAction::None, RollbackAction::None),
            };
            if pair.0 != ExecuteAction::None {
                best = Some(pair);
            }
        }
        Ok(best.unwrap_or((ExecuteAction::None, RollbackAction::None)))
    }

    fn execute(
        &self,
        action: &ExecuteAction,
        _vars: &VariableStore,
        rollback: bool,
        target: Option<&str>,
        msg_cb: &mut dyn FnMut(ProgressMessage) -> UiResponse,
        restart: &mut RestartState,
    ) -> Result<()> {
        if matches!(action, ExecuteAction::None) {
            return Ok(());
        }
        msg_cb(ProgressMessage::Tick { percentage: 0 });
        // Invoked once per entry of a merged `msp_target` action
        // (`spec.md` 4.5/4.7): `target` is the specific product this
        // call applies the patch to.
        let result = self.database.apply_patch(&self.patch_code, target.unwrap_or(""), *action);
        match result {
            Ok(observed_restart) => {
                merge_restart(restart, observed_restart);
                msg_cb(ProgressMessage::Tick { percentage: 100 });
                Ok(())
            }
            Err(e) if rollback => {
                if msg_cb(ProgressMessage::Error { code: -1, message: e.to_string() }) == UiResponse::Ignore {
                    Ok(())
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{PatchDatabase, PatchTargetState, Result, RestartState, ExecuteAction};
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakePatchDatabase {
        pub related: HashMap<String, Vec<String>>,
        pub all_installed: Vec<String>,
        pub applicability: HashMap<String, Vec<(String, u32)>>,
        pub states: HashMap<(String, String), PatchTargetState>,
    }

    impl PatchDatabase for FakePatchDatabase {
        fn enumerate_related_products(&self, upgrade_code: &str) -> Result<Vec<String>> {
            Ok(self.related.get(upgrade_code).cloned().unwrap_or_default())
        }

        fn enumerate_all_installed_products(&self) -> Result<Vec<String>> {
            Ok(self.all_installed.clone())
        }

        fn query_applicability(&self, patch_code: &str, candidate_products: &[String]) -> Result<Vec<(String, u32)>> {
            let applicable = self.applicability.get(patch_code).cloned().unwrap_or_default();
            Ok(applicable.into_iter().filter(|(p, _)| candidate_products.contains(p)).collect())
        }

        fn query_patch_state(&self, patch_code: &str, product_code: &str) -> Result<PatchTargetState> {
            Ok(self
                .states
                .get(&(patch_code.to_string(), product_code.to_string()))
                .copied()
                .unwrap_or(PatchTargetState::Absent))
        }

        fn apply_patch(&self, _patch_code: &str, _product_code: &str, _action: ExecuteAction) -> Result<RestartState> {
            Ok(RestartState::None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakePatchDatabase;
    use super::*;
    use crate::state::package::{PackageId, PackageKind};

    #[test]
    fn current_state_is_min_across_targets() {
        let mut db = FakePatchDatabase::default();
        db.applicability.insert("{PATCH}".to_string(), vec![("{A}".to_string(), 0), ("{B}".to_string(), 1)]);
        db.states.insert(("{PATCH}".to_string(), "{A}".to_string()), PatchTargetState::Present);
        db.states.insert(("{PATCH}".to_string(), "{B}".to_string()), PatchTargetState::Absent);

        let driver = PatchDriver::new(&db, "{PATCH}");
        let mut pkg = Package::new(PackageId(1), PackageKind::Patch);
        pkg.patch_targets = vec!["{A}".to_string(), "{B}".to_string()];
        let vars = VariableStore::new();
        let state = driver.detect(&pkg, &vars).unwrap();
        assert_eq!(state.current, CurrentState::Absent);
    }

    #[test]
    fn zero_targets_is_absent() {
        let db = FakePatchDatabase::default();
        let driver = PatchDriver::new(&db, "{PATCH}");
        let pkg = Package::new(PackageId(1), PackageKind::Patch);
        let vars = VariableStore::new();
        let state = driver.detect(&pkg, &vars).unwrap();
        assert_eq!(state.current, CurrentState::Absent);
    }

    #[test]
    fn falls_back_to_all_installed_products_when_no_targets_declared() {
        let mut db = FakePatchDatabase::default();
        db.all_installed = vec!["{X}".to_string()];
        db.applicability.insert("{PATCH}".to_string(), vec![("{X}".to_string(), 0)]);
        db.states.insert(("{PATCH}".to_string(), "{X}".to_string()), PatchTargetState::Present);

        let driver = PatchDriver::new(&db, "{PATCH}");
        let pkg = Package::new(PackageId(1), PackageKind::Patch);
        let vars = VariableStore::new();
        let state = driver.detect(&pkg, &vars).unwrap();
        assert_eq!(state.current, CurrentState::Present);
    }

    #[test]
    fn scenario_s4_merge_is_order_independent() {
        let p1 = OrderedPatchTarget { patch_order: 0, patch_provider_key: "P1".to_string() };
        let p2 = OrderedPatchTarget { patch_order: 1, patch_provider_key: "P2".to_string() };

        let mut forward = Vec::new();
        let sync1 = insert_ordered_target(&mut forward, p1.clone());
        let sync2 = insert_ordered_target(&mut forward, p2.clone());
        assert!(!sync1 && !sync2);
        assert_eq!(forward.iter().map(|t| t.patch_provider_key.clone()).collect::<Vec<_>>(), vec!["P1", "P2"]);

        let mut reverse = Vec::new();
        let sync_a = insert_ordered_target(&mut reverse, p2);
        let sync_b = insert_ordered_target(&mut reverse, p1);
        assert!(!sync_a);
        assert!(sync_b, "out-of-order insert must request a cache-sync-point");
        assert_eq!(reverse.iter().map(|t| t.patch_provider_key.clone()).collect::<Vec<_>>(), vec!["P1", "P2"]);
    }
}
