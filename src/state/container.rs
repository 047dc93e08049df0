//! Container records (`spec.md` 3).
//!
//! Ownership: a container's lifetime is the engine state's lifetime;
//! mutation is only permitted while the activity lock
//! ([`crate::sync::ActivityToken`]) is held.

use std::path::PathBuf;

/// Opaque identifier for a container, stable for the life of the
/// engine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId(pub u32);

/// How a container is delivered relative to the bundle image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Packaging {
    /// Appended to the bundle's own image, located via the section
    /// descriptor (C4).
    Attached,
    /// Embedded directly in the manifest/bundle metadata rather than
    /// streamed through the container reader.
    Embedded,
    /// Shipped as a separate file alongside the bundle, acquired like
    /// a payload.
    External,
}

/// A named group of payloads, either attached to the bundle image or
/// external to it.
#[derive(Clone, Debug)]
pub struct Container {
    /// Stable identifier, also the index used by
    /// `get_attached_container_info`.
    pub id: ContainerId,
    /// Where to find the container if it is external and already on
    /// disk.
    pub source_path: Option<PathBuf>,
    /// Where the container has been cached locally, once acquired.
    pub local_path: Option<PathBuf>,
    /// URL to download the container from, if external and not found
    /// locally.
    pub download_source: Option<String>,
    /// Declared size in bytes, from the manifest.
    pub file_size: u64,
    /// Delivery mode.
    pub packaging: Packaging,
    /// Whether this container is actually present in the running
    /// bundle image (derived from `get_attached_container_info`'s
    /// `present` flag for `Attached` containers; always `true` for
    /// `Embedded`/`External`).
    pub actually_attached: bool,
}

impl Container {
    /// Creates a container record with no acquired state yet.
    #[must_use]
    pub fn new(id: ContainerId, packaging: Packaging, file_size: u64) -> Self {
        Self {
            id,
            source_path: None,
            local_path: None,
            download_source: None,
            file_size,
            packaging,
            actually_attached: matches!(packaging, Packaging::Embedded | Packaging::External),
        }
    }
}
