//! # Bundle Engine Core
//!
//! This crate is the engine core of a chained-installer ("bundle")
//! executable: a self-contained installer image that carries a
//! bootstrapper UI payload plus one or more attached containers of
//! inner packages (native-installer products, patches, executables,
//! and operating-system update packages).
//!
//! The engine core is deliberately UI-less. A bootstrapper UI, the
//! build-time tool that produces bundles, argument parsing beyond the
//! switches this crate consumes, and OS-registry CRUD are all external
//! collaborators reached through narrow traits, never baked in here.
//!
//! ## Crate layout
//! - [`codec`]: length-prefixed primitive (de)serialization (C1).
//! - [`variant`]: the tagged value type backing every variable (C2).
//! - [`variables`]: the process-wide name -> value store, built-ins,
//!   and formatted-string expander (C3).
//! - [`section`]: locates the bundle's embedded metadata section (C4).
//! - [`container`]: streams payloads out of an attached container (C5).
//! - [`cache`]: content-addressed verified payload cache (C6).
//! - [`pipe`]: the two-endpoint framed transport to the elevated
//!   companion process (C7).
//! - [`elevation`]: the typed request/response protocol riding on
//!   [`pipe`] (C8).
//! - [`drivers`]: per-package-kind detect/plan/execute adapters (C9).
//! - [`plan`]: builds the immutable ordered action lists (C10).
//! - [`apply`]: runs the cache/execute/clean phases with rollback
//!   (C11).
//! - [`state`]: the in-memory bundle state (packages, containers,
//!   payloads, relations).
//! - [`controller`]: dispatches the four lifecycle verbs (C12).
//! - [`args`]: the command-line switch table.
//!
//! ## Quick start
//!
//! Loading the package/payload table from a bundle's embedded manifest
//! is an external collaborator's job (see [`controller`]'s module
//! doc); this crate starts from an already-populated
//! [`state::BundleState`] and drives it through detect/plan/apply:
//!
//! ```no_run
//! use bundle_engine::args::Args;
//! use bundle_engine::controller::{Collaborators, Controller};
//! use bundle_engine::drivers::DriverRegistry;
//! use bundle_engine::drivers::exe::StdProcessExecutor;
//! use bundle_engine::plan::CommandAction;
//! use bundle_engine::state::BundleState;
//! use bundle_engine::sync::{ApplyScope, FileLockMutex};
//! use bundle_engine::variables::builtins::{DefaultHostInfo, EnvKnownFolders};
//!
//! let args = Args::parse_from_env();
//! let folders = EnvKnownFolders;
//! let host = DefaultHostInfo;
//! let _executor = StdProcessExecutor;
//! let mutex = FileLockMutex::new(std::env::temp_dir()).expect("lock dir");
//! let collaborators = Collaborators { folders: &folders, host: &host, downloader: None, search_roots: Vec::new() };
//! let cache = bundle_engine::cache::CacheManager::at_path(std::env::temp_dir());
//!
//! let mut controller = Controller::new(
//!     BundleState::new(),
//!     &std::env::current_exe().expect("current exe"),
//!     collaborators,
//!     cache,
//!     Default::default(),
//!     ApplyScope::PerUser,
//!     &mutex,
//! ).expect("engine init");
//!
//! let registry = DriverRegistry::new(); // populated per package by the manifest loader
//! controller.detect(&registry).expect("detect");
//! controller.plan(&registry, CommandAction::Install).expect("plan");
//! let _ = args;
//! ```

pub mod apply;
pub mod args;
pub mod cache;
pub mod codec;
pub mod config;
pub mod container;
pub mod controller;
pub mod drivers;
pub mod elevation;
pub mod error;
pub mod logging;
pub mod pipe;
pub mod plan;
pub mod section;
pub mod state;
pub mod sync;
pub mod variables;
pub mod variant;

pub use error::{EngineError, Result};

#[cfg(test)]
static GLOBAL_TEST_MUTEX: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();

#[cfg(test)]
/// Serializes tests that mutate process-global state (environment
/// variables, the current directory) so they do not race each other.
pub fn global_test_mutex() -> &'static std::sync::Mutex<()> {
    GLOBAL_TEST_MUTEX.get_or_init(|| std::sync::Mutex::new(()))
}

#[cfg(test)]
/// Locks [`global_test_mutex`], recovering from a poisoned mutex left
/// behind by a previous test panic.
pub fn global_test_mutex_lock() -> std::sync::MutexGuard<'static, ()> {
    global_test_mutex()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
