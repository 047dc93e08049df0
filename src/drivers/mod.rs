//! Package drivers (C9, `spec.md` 4.5): one [`traits::PackageDriver`]
//! implementation per [`crate::state::package::PackageKind`].

pub mod exe;
pub mod native_installer;
pub mod os_update;
pub mod patch;
pub mod registry;
pub mod traits;

pub use registry::DriverRegistry;
pub use traits::{merge_restart, PackageDriver, PackageState, ProgressMessage, UiResponse};
