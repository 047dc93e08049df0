//! Per-cycle backends the controller binds each package's driver to.
//!
//! Building the kind-specific [`crate::drivers::PackageDriver`] for one
//! package needs manifest data (a product code, a patch code, an exe's
//! install/uninstall command lines) that `spec.md` 1 explicitly leaves
//! to an external manifest-parsing collaborator, so [`Controller`]
//! cannot derive it from [`crate::state::BundleState`] alone. Callers
//! that parsed the manifest build the [`crate::drivers::DriverRegistry`]
//! themselves and hand it to each verb; this struct only carries the
//! backends [`crate::variables`] and exe-package detection need, which
//! `Controller` *can* supply on its own.
//!
//! [`Controller`]: super::Controller

use crate::cache::acquire::Downloader;
use crate::variables::builtins::{HostInfo, KnownFolders};

/// Backends [`Controller::detect`](super::Controller::detect) and the
/// cache phase need regardless of which package kinds a bundle
/// carries.
pub struct Collaborators<'a> {
    /// Built-in folder path resolution.
    pub folders: &'a dyn KnownFolders,
    /// Built-in host fact resolution.
    pub host: &'a dyn HostInfo,
    /// Remote payload fetch backend, if any payload authors a
    /// `download_source`.
    pub downloader: Option<&'a dyn Downloader>,
    /// Directories to search for a payload before downloading it.
    pub search_roots: Vec<std::path::PathBuf>,
}
