//! Payload records (`spec.md` 3).
//!
//! A payload belongs to exactly one container, or none if it is
//! external. Detected cache status and the `cached` flag are derived
//! during detect / the cache phase, never authored in the manifest.

use std::path::PathBuf;

use super::container::ContainerId;

/// Stable, manifest-authored key identifying a payload (matches the
/// name the container stream yields for it, per `spec.md` 4.4).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PayloadKey(pub String);

/// How thoroughly a payload has been verified present in the local
/// cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    /// Not found in the cache at all.
    None,
    /// Found but failed verification, or only partially written.
    Partial,
    /// Found and verified complete.
    Complete,
}

/// A single file transported inside (or alongside) the bundle.
#[derive(Clone, Debug)]
pub struct Payload {
    /// Stable key, unique within the bundle.
    pub key: PayloadKey,
    /// Path to the payload if it ships alongside the bundle rather
    /// than inside a container.
    pub source_path: Option<PathBuf>,
    /// URL to download the payload from if not found locally.
    pub download_source: Option<String>,
    /// Declared size in bytes, from the manifest.
    pub file_size: u64,
    /// The container this payload is extracted from, or `None` if it
    /// is external (a standalone file next to the bundle).
    pub container_id: Option<ContainerId>,
    /// Cache status as of the last detect or cache-phase pass.
    pub cache_status: CacheStatus,
    /// `true` once the cache phase has verified this payload present
    /// and correctly sized on disk.
    pub cached: bool,
}

impl Payload {
    /// Creates a payload record with no detected cache state.
    #[must_use]
    pub fn new(key: PayloadKey, file_size: u64, container_id: Option<ContainerId>) -> Self {
        Self {
            key,
            source_path: None,
            download_source: None,
            file_size,
            container_id,
            cache_status: CacheStatus::None,
            cached: false,
        }
    }
}
