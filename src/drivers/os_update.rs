//! OS-update driver (`spec.md` 4.5): installs a Windows-Update-style
//! package via the platform update service, normalizing its exit codes
//! to the engine's restart vocabulary. Unlike the other three kinds,
//! an OS-update package has no clean uninstall story -- `plan` only
//! ever produces `Install`/no-rollback transitions.

use crate::elevation::RestartState;
use crate::error::{EngineError, Result};
use crate::state::package::{CurrentState, DetectedState, ExecuteAction, Package, RequestState, RollbackAction};
use crate::variables::VariableStore;

use super::traits::{PackageDriver, PackageState, ProgressMessage, UiResponse};

/// Raw exit codes the update installer may report, normalized here
/// instead of leaking platform-specific hex constants into callers.
mod exit_codes {
    /// The update installed with no further action needed.
    pub const SUCCESS: i32 = 0;
    /// The update installed; a reboot completes it
    /// (`ERROR_SUCCESS_REBOOT_REQUIRED`).
    pub const SUCCESS_REBOOT_REQUIRED: i32 = 3010;
    /// Windows Update's own "reboot required" code
    /// (`WU_S_REBOOT_REQUIRED`).
    pub const WU_REBOOT_REQUIRED: i32 = 0x0024_0005_u32 as i32;
    /// Windows Update's "nothing to do, already installed" code
    /// (`WU_S_ALREADY_INSTALLED`).
    pub const WU_ALREADY_INSTALLED: i32 = 0x0024_0006_u32 as i32;
}

/// The service-manager operations the OS-update driver needs around
/// the install call, per `spec.md` 4.5's note that the update service
/// must be enabled for the duration of the install. Production code
/// backs this with the real service control manager; tests supply an
/// in-memory fake, the same seam style as
/// [`super::native_installer::InstallerDatabase`].
pub trait ServiceControl: Send + Sync {
    /// Reads the service's current start type.
    ///
    /// # Errors
    /// Any [`EngineError`] describing why the query failed.
    fn start_type(&self) -> Result<ServiceStartType>;

    /// Sets the service's start type.
    ///
    /// # Errors
    /// Any [`EngineError`] describing why the change failed.
    fn set_start_type(&self, start_type: ServiceStartType) -> Result<()>;

    /// Starts the service if it is not already running.
    ///
    /// # Errors
    /// Any [`EngineError`] describing why the service could not start.
    fn start(&self) -> Result<()>;
}

/// A service's configured start behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceStartType {
    /// The service cannot be started.
    Disabled,
    /// The service starts on demand.
    Manual,
    /// The service starts automatically at boot.
    Automatic,
}

/// Installs one OS-update package. Production code shells out to the
/// platform update API; tests supply an in-memory fake.
pub trait UpdateInstaller: Send + Sync {
    /// Installs `package_path`, returning the raw exit code.
    ///
    /// # Errors
    /// Any [`EngineError`] describing why the install could not be
    /// attempted at all (a non-zero-but-recognized exit code is still
    /// `Ok`; only launch failures are `Err`).
    fn install(&self, package_path: &str) -> Result<i32>;

    /// `true` if `package_path` is already installed on this machine.
    ///
    /// # Errors
    /// Any [`EngineError`] describing why the query failed.
    fn is_installed(&self, package_path: &str) -> Result<bool>;
}

/// Restores a service's prior start type on drop, so a detect/execute
/// pass that temporarily enables the update service never leaves it
/// enabled if the package turns out not to need it (the `goto LExit`
/// cleanup the source engine used, done here with `Drop` instead).
struct ServiceStartGuard<'a> {
    service: &'a dyn ServiceControl,
    original: ServiceStartType,
}

impl<'a> ServiceStartGuard<'a> {
    fn engage(service: &'a dyn ServiceControl) -> Result<Self> {
        let original = service.start_type()?;
        if original != ServiceStartType::Automatic {
            service.set_start_type(ServiceStartType::Automatic)?;
        }
        service.start()?;
        Ok(Self { service, original })
    }
}

impl Drop for ServiceStartGuard<'_> {
    fn drop(&mut self) {
        if self.original != ServiceStartType::Automatic {
            let _ = self.service.set_start_type(self.original);
        }
    }
}

/// The OS-update [`PackageDriver`], bound to one package's installer
/// path and the service that must be running to apply it.
pub struct OsUpdateDriver<'a> {
    service: &'a dyn ServiceControl,
    installer: &'a dyn UpdateInstaller,
    package_path: String,
}

impl<'a> OsUpdateDriver<'a> {
    /// Creates a driver bound to one update package.
    #[must_use]
    pub fn new(service: &'a dyn ServiceControl, installer: &'a dyn UpdateInstaller, package_path: impl Into<String>) -> Self {
        Self { service, installer, package_path: package_path.into() }
    }

    /// Normalizes a raw installer exit code to a `(success, restart)`
    /// pair, per `spec.md` 4.5/4.8.
    fn normalize(code: i32) -> (bool, RestartState) {
        match code {
            exit_codes::SUCCESS | exit_codes::WU_ALREADY_INSTALLED => (true, RestartState::None),
            exit_codes::SUCCESS_REBOOT_REQUIRED | exit_codes::WU_REBOOT_REQUIRED => (true, RestartState::Required),
            _ => (false, RestartState::None),
        }
    }
}

impl PackageDriver for OsUpdateDriver<'_> {
    fn detect(&self, _pkg: &Package, _vars: &VariableStore) -> Result<PackageState> {
        let installed = self.installer.is_installed(&self.package_path)?;
        let current = if installed { CurrentState::Present } else { CurrentState::Absent };
        Ok(PackageState { current, detected: DetectedState::None })
    }

    fn plan(&self, pkg: &Package, action: RequestState) -> Result<(ExecuteAction, RollbackAction)> {
        Ok(match (pkg.current_state, action) {
            (CurrentState::Absent | CurrentState::Unknown, RequestState::Present) => {
                (ExecuteAction::Install, RollbackAction::None)
            }
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
        if !matches!(action, ExecuteAction::Install) {
            return Ok(());
        }
        if rollback {
            // No rollback action exists for an OS-update package
            // (`spec.md` 4.5): nothing to undo.
            return Ok(());
        }

        msg_cb(ProgressMessage::Tick { percentage: 0 });
        let guard = ServiceStartGuard::engage(self.service)?;
        let code = self.installer.install(&self.package_path);
        drop(guard);

        let code = code?;
        let (success, observed_restart) = Self::normalize(code);
        if success {
            super::traits::merge_restart(restart, observed_restart);
            msg_cb(ProgressMessage::Tick { percentage: 100 });
            Ok(())
        } else {
            Err(EngineError::ChildFailed { action: self.package_path.clone(), code })
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{Result, ServiceControl, ServiceStartType, UpdateInstaller};
    use std::sync::Mutex;

    pub struct FakeServiceControl {
        pub start_type: Mutex<ServiceStartType>,
        pub started: Mutex<bool>,
    }

    impl Default for FakeServiceControl {
        fn default() -> Self {
            Self { start_type: Mutex::new(ServiceStartType::Disabled), started: Mutex::new(false) }
        }
    }

    impl ServiceControl for FakeServiceControl {
        fn start_type(&self) -> Result<ServiceStartType> {
            Ok(*self.start_type.lock().unwrap())
        }

        fn set_start_type(&self, start_type: ServiceStartType) -> Result<()> {
            *self.start_type.lock().unwrap() = start_type;
            Ok(())
        }

        fn start(&self) -> Result<()> {
            *self.started.lock().unwrap() = true;
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeUpdateInstaller {
        pub exit_code: i32,
        pub installed: Mutex<Vec<String>>,
    }

    impl UpdateInstaller for FakeUpdateInstaller {
        fn install(&self, package_path: &str) -> Result<i32> {
            self.installed.lock().unwrap().push(package_path.to_string());
            Ok(self.exit_code)
        }

        fn is_installed(&self, package_path: &str) -> Result<bool> {
            Ok(self.installed.lock().unwrap().iter().any(|p| p == package_path))
        }
    }
}
