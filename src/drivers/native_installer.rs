//! Native-installer driver (`spec.md` 4.5): product/feature detection
//! plus the feature action state machine. The actual installer
//! backend (MSI or an equivalent) is an external collaborator reached
//! through [`InstallerDatabase`] -- this module owns the state-table
//! logic, not a bundled installer engine.

use crate::elevation::RestartState;
use crate::error::{EngineError, Result};
use crate::state::package::{CurrentState, DetectedState, ExecuteAction, Package, RequestState, RollbackAction};
use crate::variables::VariableStore;

use super::traits::{merge_restart, PackageDriver, PackageState, ProgressMessage, UiResponse};

/// Per-feature action table entry, per `spec.md` 4.5.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureAction {
    /// No change.
    None,
    /// Install the feature to the local machine.
    AddLocal,
    /// Install the feature to run from source.
    AddSource,
    /// Install with whatever the installer's default is.
    AddDefault,
    /// Reinstall an already-present feature.
    Reinstall,
    /// Advertise the feature without installing it.
    Advertise,
    /// Remove the feature.
    Remove,
}

impl FeatureAction {
    #[must_use]
    fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AddLocal => "add_local",
            Self::AddSource => "add_source",
            Self::AddDefault => "add_default",
            Self::Reinstall => "reinstall",
            Self::Advertise => "advertise",
            Self::Remove => "remove",
        }
    }
}

/// Queries and mutates the real installer backend. Production code
/// supplies a real native-installer integration; tests supply an
/// in-memory fake, the same seam style as
/// [`crate::variables::builtins::KnownFolders`].
pub trait InstallerDatabase: Send + Sync {
    /// Queries whether `product_code` is installed in the given
    /// context.
    ///
    /// # Errors
    /// Any [`EngineError`] describing a query failure.
    fn query_product_state(&self, product_code: &str, per_machine: bool) -> Result<CurrentState>;

    /// Enumerates the product's declared feature names.
    ///
    /// # Errors
    /// Any [`EngineError`] describing a query failure.
    fn enumerate_features(&self, product_code: &str) -> Result<Vec<String>>;

    /// Queries a single feature's installed-ness, as a detected
    /// [`FeatureAction`]-table key (e.g. `"add_local"` if already
    /// locally installed, `"none"` if absent).
    ///
    /// # Errors
    /// Any [`EngineError`] describing a query failure.
    fn query_feature_state(&self, product_code: &str, feature: &str) -> Result<String>;

    /// Performs the real install/uninstall/repair for `product_code`,
    /// applying `feature_actions` where relevant.
    ///
    /// # Errors
    /// Any [`EngineError`] describing why execution failed.
    fn apply_action(
        &self,
        product_code: &str,
        action: ExecuteAction,
        per_machine: bool,
        feature_actions: &[(String, FeatureAction)],
    ) -> Result<RestartState>;
}

/// The native-installer [`PackageDriver`], parameterized over the
/// product code it governs (the manifest's first provider key, by
/// convention).
pub struct NativeInstallerDriver<'a> {
    database: &'a dyn InstallerDatabase,
    product_code: String,
}

impl<'a> NativeInstallerDriver<'a> {
    /// Creates a driver bound to one product code.
    #[must_use]
    pub fn new(database: &'a dyn InstallerDatabase, product_code: impl Into<String>) -> Self {
        Self { database, product_code: product_code.into() }
    }
}

impl PackageDriver for NativeInstallerDriver<'_> {
    fn detect(&self, pkg: &Package, _vars: &VariableStore) -> Result<PackageState> {
        let current = self.database.query_product_state(&self.product_code, pkg.per_machine)?;
        let feature_names = self.database.enumerate_features(&self.product_code)?;
        let mut features = std::collections::BTreeMap::new();
        for name in feature_names {
            let state = self.database.query_feature_state(&self.product_code, &name)?;
            features.insert(name, state);
        }
        Ok(PackageState { current, detected: DetectedState::NativeInstaller { features } })
    }

    fn plan(&self, pkg: &Package, action: RequestState) -> Result<(ExecuteAction, RollbackAction)> {
        Ok(match (pkg.current_state, action) {
            (CurrentState::Present, RequestState::Repair) => (ExecuteAction::Repair, RollbackAction::None),
            (CurrentState::Absent | CurrentState::Unknown, RequestState::Present) => {
                (ExecuteAction::Install, RollbackAction::Uninstall)
            }
            (CurrentState::Present | CurrentState::Superseded, RequestState::Absent | RequestState::ForceAbsent) => {
                (ExecuteAction::Uninstall, RollbackAction::Install)
            }
            (CurrentState::Cached, RequestState::Present) => (ExecuteAction::Install, RollbackAction::Uninstall),
            _ => (ExecuteAction::None, RollbackAction::None),
        })
    }

    fn execute(
        &self,
        action: &ExecuteAction,
        _vars: &VariableStore,
        rollback: bool,
        _target: Option<&str>,
        msg_cb: &mut dyn FnMut(ProgressMessage) -> UiResponse,
        restart: &mut RestartState,
    ) -> Result<()> {
        if matches!(action, ExecuteAction::None) {
            return Ok(());
        }
        msg_cb(ProgressMessage::Tick { percentage: 0 });
        let per_machine = true;
        let result = self.database.apply_action(&self.product_code, *action, per_machine, &[]);
        match result {
            Ok(observed_restart) => {
                merge_restart(restart, observed_restart);
                msg_cb(ProgressMessage::Tick { percentage: 100 });
                Ok(())
            }
            Err(e) if rollback => {
                let response =
                    msg_cb(ProgressMessage::Error { code: -1, message: e.to_string() });
                if response == UiResponse::Ignore {
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
    use super::{CurrentState, ExecuteAction, FeatureAction, InstallerDatabase, RestartState, Result};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeInstallerDatabase {
        pub product_states: HashMap<String, CurrentState>,
        pub features: HashMap<String, Vec<String>>,
        pub feature_states: HashMap<(String, String), String>,
        pub applied: Mutex<Vec<(String, ExecuteAction)>>,
    }

    impl InstallerDatabase for FakeInstallerDatabase {
        fn query_product_state(&self, product_code: &str, _per_machine: bool) -> Result<CurrentState> {
            Ok(self.product_states.get(product_code).copied().unwrap_or(CurrentState::Absent))
        }

        fn enumerate_features(&self, product_code: &str) -> Result<Vec<String>> {
            Ok(self.features.get(product_code).cloned().unwrap_or_default())
        }

        fn query_feature_state(&self, product_code: &str, feature: &str) -> Result<String> {
            Ok(self
                .feature_states
                .get(&(product_code.to_string(), feature.to_string()))
                .cloned()
                .unwrap_or_else(|| "none".to_string()))
        }

        fn apply_action(
            &self,
            product_code: &str,
            action: ExecuteAction,
            _per_machine: bool,
            _feature_actions: &[(String, FeatureAction)],
        ) -> Result<RestartState> {
            self.applied.lock().unwrap().push((product_code.to_string(), action));
            Ok(RestartState::None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeInstallerDatabase;
    use super::*;
    use crate::state::package::{PackageId, PackageKind};

    #[test]
    fn detect_reports_product_and_feature_state() {
        let mut db = FakeInstallerDatabase::default();
        db.product_states.insert("{PRODUCT}".to_string(), CurrentState::Present);
        db.features.insert("{PRODUCT}".to_string(), vec!["Core".to_string()]);
        db.feature_states.insert(("{PRODUCT}".to_string(), "Core".to_string()), "add_local".to_string());

        let driver = NativeInstallerDriver::new(&db, "{PRODUCT}");
        let pkg = Package::new(PackageId(1), PackageKind::NativeInstaller);
        let vars = VariableStore::new();
        let state = driver.detect(&pkg, &vars).unwrap();
        assert_eq!(state.current, CurrentState::Present);
        match state.detected {
            DetectedState::NativeInstaller { features } => {
                assert_eq!(features.get("Core").unwrap(), "add_local");
            }
            other => panic!("unexpected detected state: {other:?}"),
        }
    }

    #[test]
    fn plan_installs_an_absent_product_requested_present() {
        let db = FakeInstallerDatabase::default();
        let driver = NativeInstallerDriver::new(&db, "{PRODUCT}");
        let mut pkg = Package::new(PackageId(1), PackageKind::NativeInstaller);
        pkg.current_state = CurrentState::Absent;
        let (execute, rollback) = driver.plan(&pkg, RequestState::Present).unwrap();
        assert_eq!(execute, ExecuteAction::Install);
        assert_eq!(rollback, RollbackAction::Uninstall);
    }

    #[test]
    fn plan_uninstalls_a_present_product_requested_absent() {
        let db = FakeInstallerDatabase::default();
        let driver = NativeInstallerDriver::new(&db, "{PRODUCT}");
        let mut pkg = Package::new(PackageId(1), PackageKind::NativeInstaller);
        pkg.current_state = CurrentState::Present;
        let (execute, rollback) = driver.plan(&pkg, RequestState::Absent).unwrap();
        assert_eq!(execute, ExecuteAction::Uninstall);
        assert_eq!(rollback, RollbackAction::Install);
    }

    #[test]
    fn execute_invokes_the_installer_database() {
        let db = FakeInstallerDatabase::default();
        let driver = NativeInstallerDriver::new(&db, "{PRODUCT}");
        let vars = VariableStore::new();
        let mut restart = RestartState::None;
        driver
            .execute(&ExecuteAction::Install, &vars, false, None, &mut |_| UiResponse::Ok, &mut restart)
            .unwrap();
        assert_eq!(db.applied.lock().unwrap().len(), 1);
    }

    #[test]
    fn execute_is_a_no_op_for_none_action() {
        let db = FakeInstallerDatabase::default();
        let driver = NativeInstallerDriver::new(&db, "{PRODUCT}");
        let vars = VariableStore::new();
        let mut restart = RestartState::None;
        driver.execute(&ExecuteAction::None, &vars, false, None, &mut |_| UiResponse::Ok, &mut restart).unwrap();
        assert!(db.applied.lock().unwrap().is_empty());
    }
}
