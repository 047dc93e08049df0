//! The built-in variable catalogue (`spec.md` 4.3).
//!
//! Built-in values are computed lazily on first access and cached for
//! the lifetime of the engine. Everything that actually reaches the
//! host OS (known-folder paths, OS version, language IDs, ...) goes
//! through one of the two traits below so tests can supply
//! deterministic fakes instead of depending on the real machine --
//! the same seam style the teacher crate uses for
//! `logic::preflight::command::CommandRunner`.

use crate::error::Result;
use crate::variant::Variant;

/// Resolves well-known directory paths. Every `*Folder` built-in and
/// `WindowsVolume` route through this trait; paths are always
/// trailing-separator-terminated, per `spec.md` 4.3.
pub trait KnownFolders: Send + Sync {
    /// Resolves one of the folder built-ins by name (e.g.
    /// `"ProgramFilesFolder"`). Returns `None` for names this
    /// implementation does not recognize.
    fn resolve(&self, name: &str) -> Option<String>;
}

/// Resolves host/OS facts: version numbers, language IDs, user/session
/// state. Everything non-path in the built-in catalogue routes through
/// this trait.
pub trait HostInfo: Send + Sync {
    /// Resolves one of the non-folder built-ins by name. Returns
    /// `None` for names this implementation does not recognize.
    fn resolve(&self, name: &str) -> Option<Variant>;
}

/// The full set of folder-builtin names, trailing-separator-terminated
/// directory paths per `spec.md` 4.3.
pub const FOLDER_VARIABLES: &[&str] = &[
    "AdminToolsFolder",
    "AppDataFolder",
    "CommonAppDataFolder",
    "CommonFiles64Folder",
    "CommonFilesFolder",
    "CommonFiles6432Folder",
    "DesktopFolder",
    "FavoritesFolder",
    "FontsFolder",
    "LocalAppDataFolder",
    "MyPicturesFolder",
    "PersonalFolder",
    "ProgramFiles64Folder",
    "ProgramFilesFolder",
    "ProgramFiles6432Folder",
    "ProgramMenuFolder",
    "SendToFolder",
    "StartMenuFolder",
    "StartupFolder",
    "SystemFolder",
    "System64Folder",
    "TemplateFolder",
    "TempFolder",
    "WindowsFolder",
    "WindowsVolume",
];

/// Host/OS fact built-ins that are strings.
pub const HOST_STRING_VARIABLES: &[&str] = &["ComputerName", "Date", "InstallerName", "InstallerVersion", "LogonUser"];

/// Host/OS fact built-ins that are version-typed.
pub const HOST_VERSION_VARIABLES: &[&str] = &["OSVersion", "OSVersion64", "ServicePackLevel"];

/// Host/OS fact built-ins that are numeric.
pub const HOST_NUMERIC_VARIABLES: &[&str] = &[
    "SystemLanguageID",
    "UserLanguageID",
    "UserUILanguageID",
    "Privileged",
    "RebootPending",
    "CompatibilityMode",
    "TerminalServer",
    "NTProductType",
    "NTSuitePersonal",
    "NTSuiteProfessional",
    "NTSuiteServer",
    "NTSuiteSmallBusiness",
    "NTSuiteSmallBusinessRestricted",
    "NTSuiteEnterprise",
    "NTSuiteBackOffice",
    "NTSuiteCommunications",
    "NTSuiteDatacenter",
    "NTSuiteEmbeddedNT",
    "NTSuiteWebServer",
    "ProcessorArchitecture",
];

/// Engine-managed built-ins the controller itself writes via the
/// privileged override path (not resolved through [`KnownFolders`] or
/// [`HostInfo`]).
pub const ENGINE_MANAGED_VARIABLES: &[&str] = &[
    "BundleAction",
    "BundleInstalled",
    "BundleElevated",
    "BundleUILevel",
    "BundleForcedRestartPackage",
    "BundleActiveParent",
    "BundleProviderKey",
    "BundleSourceProcessPath",
    "BundleSourceProcessFolder",
    "BundleTag",
    "BundleVersion",
    "BundleExecutePackageCacheFolder",
    "BundleExecutePackageAction",
];

/// Default production [`KnownFolders`] implementation, using platform
/// environment variables as an approximation of the real known-folder
/// API (`SHGetKnownFolderPath` on Windows). The exact resolution
/// strategy is an external-collaborator concern; what this engine
/// contracts on is that the result is always
/// trailing-separator-terminated.
pub struct EnvKnownFolders;

impl KnownFolders for EnvKnownFolders {
    fn resolve(&self, name: &str) -> Option<String> {
        if !FOLDER_VARIABLES.contains(&name) {
            return None;
        }
        let base = std::env::var("BUNDLE_ENGINE_FOLDER_ROOT")
            .or_else(|_| std::env::var("TEMP"))
            .or_else(|_| std::env::var("HOME"))
            .unwrap_or_else(|_| "/tmp".to_string());
        let mut path = std::path::PathBuf::from(base);
        path.push(name);
        let mut s = path.to_string_lossy().into_owned();
        if !s.ends_with(std::path::MAIN_SEPARATOR) {
            s.push(std::path::MAIN_SEPARATOR);
        }
        Some(s)
    }
}

/// Default production [`HostInfo`] implementation. Several facts (user
/// language IDs, terminal-server state, NT suite flags) are genuinely
/// platform-specific; this implementation supplies safe, documented
/// defaults everywhere the host platform does not expose the fact
/// portably, and callers that need exact host enumeration should
/// inject a platform-specific implementation instead.
pub struct DefaultHostInfo;

impl HostInfo for DefaultHostInfo {
    fn resolve(&self, name: &str) -> Option<Variant> {
        match name {
            "ComputerName" => Some(Variant::Str(
                hostname_best_effort().unwrap_or_else(|| "unknown-host".to_string()),
            )),
            "Date" => Some(Variant::Str(chrono::Local::now().format("%Y-%m-%d").to_string())),
            "InstallerName" => Some(Variant::Str("Bundle Engine".to_string())),
            "InstallerVersion" => Some(Variant::Str(env!("CARGO_PKG_VERSION").to_string())),
            "LogonUser" => Some(Variant::Str(
                std::env::var("USER")
                    .or_else(|_| std::env::var("USERNAME"))
                    .unwrap_or_else(|_| "unknown".to_string()),
            )),
            "OSVersion" | "OSVersion64" => Some(Variant::Version(0)),
            "ServicePackLevel" => Some(Variant::Version(0)),
            _ if HOST_NUMERIC_VARIABLES.contains(&name) => Some(Variant::Numeric(0)),
            _ => None,
        }
    }
}

fn hostname_best_effort() -> Option<String> {
    std::env::var("COMPUTERNAME").ok().or_else(|| std::env::var("HOSTNAME").ok())
}

/// # Errors
/// Returns [`crate::EngineError::NotFound`] if `name` is not a
/// recognized built-in in any catalogue.
pub fn resolve_builtin(
    name: &str,
    folders: &dyn KnownFolders,
    host: &dyn HostInfo,
) -> Result<Variant> {
    if let Some(path) = folders.resolve(name) {
        return Ok(Variant::Str(path));
    }
    if let Some(value) = host.resolve(name) {
        return Ok(value);
    }
    Err(crate::EngineError::NotFound {
        what: format!("builtin variable {name}"),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{HostInfo, KnownFolders};
    use crate::variant::Variant;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeKnownFolders {
        pub paths: HashMap<&'static str, String>,
    }

    impl KnownFolders for FakeKnownFolders {
        fn resolve(&self, name: &str) -> Option<String> {
            self.paths.get(name).cloned()
        }
    }

    #[derive(Default)]
    pub struct FakeHostInfo {
        pub facts: HashMap<&'static str, Variant>,
    }

    impl HostInfo for FakeHostInfo {
        fn resolve(&self, name: &str) -> Option<Variant> {
            self.facts.get(name).cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{FakeHostInfo, FakeKnownFolders};
    use super::*;

    #[test]
    fn folder_builtin_resolves_through_known_folders() {
        let mut folders = FakeKnownFolders::default();
        folders.paths.insert("TempFolder", "/tmp/".to_string());
        let host = FakeHostInfo::default();
        let value = resolve_builtin("TempFolder", &folders, &host).unwrap();
        assert_eq!(value, Variant::Str("/tmp/".to_string()));
    }

    #[test]
    fn host_builtin_resolves_through_host_info() {
        let folders = FakeKnownFolders::default();
        let mut host = FakeHostInfo::default();
        host.facts.insert("SystemLanguageID", Variant::Numeric(1033));
        let value = resolve_builtin("SystemLanguageID", &folders, &host).unwrap();
        assert_eq!(value, Variant::Numeric(1033));
    }

    #[test]
    fn unknown_builtin_is_not_found() {
        let folders = FakeKnownFolders::default();
        let host = FakeHostInfo::default();
        let err = resolve_builtin("NotARealVariable", &folders, &host).unwrap_err();
        assert!(matches!(err, crate::EngineError::NotFound { .. }));
    }
}
