//! Phase C interpreter (`spec.md` 4.7/4.9): best-effort removal of
//! each finished package's cache directory, run after execute whether
//! or not execute itself succeeded. A single package's removal
//! failing does not stop the rest -- the source engine's "clean phase
//! never fails the apply" rule.

use crate::cache::CacheManager;
use crate::plan::actions::CleanAction;
use crate::state::BundleState;

/// Removes every `clean_actions` entry's package cache directory,
/// logging (not propagating) any failure.
pub fn run(actions: &[CleanAction], state: &BundleState, cache: &CacheManager) {
    for action in actions {
        let Some(pkg) = state.package(action.package_id) else {
            tracing::warn!(package_id = action.package_id.0, "clean phase: package no longer in state, skipping");
            continue;
        };
        if let Err(err) = cache.remove_package(pkg) {
            tracing::warn!(package_id = action.package_id.0, error = %err, "clean phase: failed to remove package cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::package::{Package, PackageId, PackageKind};

    #[test]
    fn removes_every_listed_package_cache_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::at_path(dir.path().join("cache"));
        let mut state = BundleState::new();
        let pkg = Package::new(PackageId(1), PackageKind::Exe);
        std::fs::create_dir_all(cache.package_dir(&pkg)).unwrap();
        state.packages.push(pkg);

        run(&[CleanAction { package_id: PackageId(1) }], &state, &cache);
        assert!(!cache.package_dir(state.package(PackageId(1)).unwrap()).exists());
    }

    #[test]
    fn missing_package_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::at_path(dir.path().join("cache"));
        let state = BundleState::new();
        run(&[CleanAction { package_id: PackageId(99) }], &state, &cache);
    }
}
