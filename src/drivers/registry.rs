//! Maps a package id to the driver that owns it, so
//! `apply::execute_phase` can dispatch through one `&dyn PackageDriver`
//! reference per package regardless of its `PackageKind` (`spec.md`
//! 4.5). The controller builds one of these per apply cycle, after
//! constructing the kind-specific driver for each package with its
//! real collaborators.

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::state::package::PackageId;

use super::traits::PackageDriver;

/// Borrowed-driver lookup table, built fresh for one apply cycle.
#[derive(Default)]
pub struct DriverRegistry<'a> {
    drivers: HashMap<PackageId, &'a dyn PackageDriver>,
}

impl<'a> DriverRegistry<'a> {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { drivers: HashMap::new() }
    }

    /// Binds `package_id` to `driver` for the lifetime of this registry.
    pub fn insert(&mut self, package_id: PackageId, driver: &'a dyn PackageDriver) {
        self.drivers.insert(package_id, driver);
    }

    /// Looks up the driver for `package_id`.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if no driver was registered for
    /// this package.
    pub fn get(&self, package_id: PackageId) -> Result<&'a dyn PackageDriver> {
        self.drivers.get(&package_id).copied().ok_or_else(|| EngineError::NotFound {
            what: format!("driver for package {}", package_id.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::exe::test_support::FakeProcessExecutor;
    use crate::drivers::exe::ExeDriver;
    use crate::variables::builtins::test_support::{FakeHostInfo, FakeKnownFolders};

    #[test]
    fn missing_driver_is_not_found() {
        let registry = DriverRegistry::new();
        let err = registry.get(PackageId(1)).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn inserted_driver_is_retrievable() {
        let executor = FakeProcessExecutor::default();
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let driver = ExeDriver::new(&executor, &folders, &host, "setup.exe", "", None, "");
        let mut registry = DriverRegistry::new();
        registry.insert(PackageId(1), &driver);
        assert!(registry.get(PackageId(1)).is_ok());
    }
}
