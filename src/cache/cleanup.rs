//! Cache cleanup: `remove_package_from_cache` (`spec.md` 4.7 Phase C)
//! and full-cache garbage collection for `-layout`/uninstall
//! completion.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::state::{Package, PackageId};

/// Removes a single package's cache directory, best-effort: a missing
/// directory is treated as already clean, matching the Phase C note
/// that this action must not fail the apply if the cache entry was
/// never populated.
///
/// # Errors
/// Propagates any I/O error other than "not found".
pub fn remove_package_from_cache(package_dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(package_dir) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(EngineError::Io {
            action: format!("removing cache directory {}", package_dir.display()),
            source,
        }),
    }
}

/// Removes every immediate subdirectory of `root` that is not the
/// cache directory of any package in `live_packages`, returning the
/// paths actually removed.
///
/// # Errors
/// Returns [`EngineError::Io`] if `root` cannot be listed, or if a
/// stale directory cannot be removed.
pub fn garbage_collect(root: &Path, live_packages: &[PackageId], packages: &[Package]) -> Result<Vec<PathBuf>> {
    let live_dirs: std::collections::HashSet<String> = packages
        .iter()
        .filter(|pkg| live_packages.contains(&pkg.id))
        .map(|pkg| pkg.cache_id.clone().unwrap_or_else(|| format!("pkg-{}", pkg.id.0)))
        .collect();

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(EngineError::Io {
                action: format!("listing cache root {}", root.display()),
                source,
            })
        }
    };

    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| EngineError::Io {
            action: format!("reading cache root entry under {}", root.display()),
            source,
        })?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if live_dirs.contains(name.as_ref()) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path).map_err(|source| EngineError::Io {
                action: format!("removing stale cache directory {}", path.display()),
                source,
            })?;
            removed.push(path);
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::package::PackageKind;

    #[test]
    fn remove_package_from_cache_is_idempotent_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("does-not-exist");
        remove_package_from_cache(&target).unwrap();
    }

    #[test]
    fn remove_package_from_cache_deletes_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("pkg-1");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("payload.bin"), b"x").unwrap();
        remove_package_from_cache(&target).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn garbage_collect_removes_only_stale_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg-1")).unwrap();
        std::fs::create_dir_all(dir.path().join("pkg-2")).unwrap();

        let mut keep = Package::new(PackageId(1), PackageKind::Exe);
        keep.cache_id = Some("pkg-1".to_string());
        let mut stale = Package::new(PackageId(2), PackageKind::Exe);
        stale.cache_id = Some("pkg-2".to_string());

        let removed = garbage_collect(dir.path(), &[PackageId(1)], &[keep, stale]).unwrap();
        assert_eq!(removed, vec![dir.path().join("pkg-2")]);
        assert!(dir.path().join("pkg-1").exists());
        assert!(!dir.path().join("pkg-2").exists());
    }

    #[test]
    fn garbage_collect_on_missing_root_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let removed = garbage_collect(&missing, &[], &[]).unwrap();
        assert!(removed.is_empty());
    }
}
