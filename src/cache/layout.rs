//! Copies a verified payload into its final on-disk location
//! (`spec.md` 4.7's `layout_bundle`/`layout_container`/
//! `layout_payload` cache-phase actions).
//!
//! Each operation takes a `try_count` matching the action shapes named
//! in `spec.md`: the cache phase retries a failed layout up to the
//! caller's retry policy before surfacing to the bootstrapper UI, so
//! this module reports which attempt failed rather than looping
//! internally -- the retry loop itself lives in
//! [`crate::apply::cache_phase`].

use std::path::Path;

use crate::error::{EngineError, Result};

/// Copies `source` to `destination`, creating parent directories as
/// needed. `try_count` is recorded in the error on failure so the
/// cache-phase retry loop can log which attempt failed; it does not
/// change behavior here.
///
/// # Errors
/// Returns [`EngineError::Io`] if the copy fails.
pub fn layout_file(source: &Path, destination: &Path, try_count: u32) -> Result<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|source_err| EngineError::Io {
            action: format!("creating layout directory {} (attempt {try_count})", parent.display()),
            source: source_err,
        })?;
    }
    std::fs::copy(source, destination).map_err(|source_err| EngineError::Io {
        action: format!(
            "laying out {} to {} (attempt {try_count})",
            source.display(),
            destination.display()
        ),
        source: source_err,
    })?;
    Ok(())
}

/// Lays out the whole bundle image (for `-layout`) to `destination_dir`.
///
/// # Errors
/// As [`layout_file`].
pub fn layout_bundle(bundle_path: &Path, destination_dir: &Path, try_count: u32) -> Result<()> {
    let file_name = bundle_path.file_name().ok_or_else(|| EngineError::InvalidArgument {
        detail: "bundle path has no file name".to_string(),
    })?;
    layout_file(bundle_path, &destination_dir.join(file_name), try_count)
}

/// Lays out an already-acquired container file.
///
/// # Errors
/// As [`layout_file`].
pub fn layout_container(acquired_path: &Path, destination: &Path, try_count: u32) -> Result<()> {
    layout_file(acquired_path, destination, try_count)
}

/// Lays out an already-verified payload file.
///
/// # Errors
/// As [`layout_file`].
pub fn layout_payload(acquired_path: &Path, destination: &Path, try_count: u32) -> Result<()> {
    layout_file(acquired_path, destination, try_count)
}
