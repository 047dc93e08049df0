//! Content-addressed verified payload cache (C6).
//!
//! `spec.md` names this component in its overview table but the
//! narrative detail lives in the apply engine's cache-phase
//! description (`spec.md` 4.7), which is the authoritative behavioral
//! source for the operations below. [`CacheManager`] is rooted at a
//! per-bundle cache folder resolved through the same
//! [`crate::variables::builtins::KnownFolders`] trait the variable
//! store's `CommonAppDataFolder` built-in uses.

pub mod acquire;
pub mod cleanup;
pub mod layout;
pub mod verify;

use std::path::PathBuf;

use crate::error::{EngineError, Result};
use crate::state::{Package, PackageId};
use crate::variables::builtins::KnownFolders;

/// Root of a bundle's local payload cache, one directory per package
/// keyed by its `cache_id`.
pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    /// Resolves the cache root under `CommonAppDataFolder` for
    /// `bundle_provider_key`, creating it if absent.
    ///
    /// # Errors
    /// Returns [`EngineError::Io`] if the directory cannot be created.
    pub fn open(bundle_provider_key: &str, folders: &dyn KnownFolders) -> Result<Self> {
        let base = folders.resolve("CommonAppDataFolder").ok_or_else(|| EngineError::NotFound {
            what: "CommonAppDataFolder built-in".to_string(),
        })?;
        let mut root = PathBuf::from(base);
        root.push("Package Cache");
        root.push(bundle_provider_key);
        std::fs::create_dir_all(&root).map_err(|source| EngineError::Io {
            action: format!("creating cache root {}", root.display()),
            source,
        })?;
        Ok(Self { root })
    }

    /// In-memory cache manager rooted at an arbitrary path, used by
    /// tests and by callers that already resolved a temp directory.
    #[must_use]
    pub fn at_path(root: PathBuf) -> Self {
        Self { root }
    }

    /// The cache root directory.
    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Final on-disk directory for one package's cached payloads.
    #[must_use]
    pub fn package_dir(&self, pkg: &Package) -> PathBuf {
        let id = pkg.cache_id.clone().unwrap_or_else(|| format!("pkg-{}", pkg.id.0));
        self.root.join(id)
    }

    /// Removes a package's entire cache directory, per `spec.md`
    /// 4.7's Phase C `remove_package_from_cache`, best-effort.
    ///
    /// # Errors
    /// Propagates a non-`NotFound` I/O error; a missing directory is
    /// treated as already clean.
    pub fn remove_package(&self, pkg: &Package) -> Result<()> {
        cleanup::remove_package_from_cache(&self.package_dir(pkg))
    }

    /// Removes every cache directory not referenced by `live_packages`,
    /// used by `-layout`/uninstall completion for full-cache GC.
    ///
    /// # Errors
    /// Returns [`EngineError::Io`] if the root cannot be listed.
    pub fn garbage_collect(&self, live_packages: &[PackageId], packages: &[Package]) -> Result<Vec<PathBuf>> {
        cleanup::garbage_collect(&self.root, live_packages, packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::package::PackageKind;

    #[test]
    fn package_dir_uses_cache_id_when_set() {
        let cache = CacheManager::at_path(PathBuf::from("/cache-root"));
        let mut pkg = Package::new(PackageId(1), PackageKind::Exe);
        pkg.cache_id = Some("abc123".to_string());
        assert_eq!(cache.package_dir(&pkg), PathBuf::from("/cache-root/abc123"));
    }

    #[test]
    fn package_dir_falls_back_to_package_id() {
        let cache = CacheManager::at_path(PathBuf::from("/cache-root"));
        let pkg = Package::new(PackageId(7), PackageKind::Exe);
        assert_eq!(cache.package_dir(&pkg), PathBuf::from("/cache-root/pkg-7"));
    }
}
