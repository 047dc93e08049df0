//! Elevation protocol messages (`spec.md` 4.8): one enum per message
//! family, each variant a struct of ordered C1 fields, `encode`/
//! `decode` built on [`crate::codec`]. Every message carrying
//! variables serializes them at the tail via
//! [`crate::variables::serialize`], per §4.8's rule.

use crate::codec::{Reader, Writer};
use crate::error::{EngineError, Result};
use crate::variables::serialize::{deserialize, serialize, SerializedVariable};

/// Normalizes the several `reboot_required`/`reboot_initiated`-style
/// outcomes named across `spec.md` into one small enum, per §4.8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RestartState {
    /// No restart implication.
    #[default]
    None,
    /// A restart is required before the change takes effect.
    Required,
    /// A restart has already been scheduled/initiated.
    Initiated,
}

impl RestartState {
    fn tag(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Required => 1,
            Self::Initiated => 2,
        }
    }

    fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::Required),
            2 => Ok(Self::Initiated),
            other => Err(EngineError::CorruptFormat {
                what: format!("unknown restart state tag {other}"),
                path: None,
            }),
        }
    }
}

macro_rules! message_type_tags {
    ($($name:ident = $tag:expr),+ $(,)?) => {
        /// Wire discriminant carried in the pipe frame header
        /// ([`crate::pipe::Frame::msg_type`]).
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        pub enum MessageType {
            $($name = $tag),+
        }

        impl MessageType {
            /// # Errors
            /// Returns [`EngineError::CorruptFormat`] for an
            /// unrecognized tag.
            pub fn from_u32(tag: u32) -> Result<Self> {
                match tag {
                    $($tag => Ok(Self::$name),)+
                    other => Err(EngineError::CorruptFormat {
                        what: format!("unknown elevation message type {other}"),
                        path: None,
                    }),
                }
            }
        }
    };
}

message_type_tags! {
    ApplyInitialize = 1,
    ApplyUninitialize = 2,
    SessionBegin = 3,
    SessionResume = 4,
    SessionEnd = 5,
    SaveState = 6,
    ProcessDependentRegistration = 7,
    ExecuteExePackage = 8,
    ExecuteMsiPackage = 9,
    ExecuteMspPackage = 10,
    ExecuteMsuPackage = 11,
    ExecutePackageProvider = 12,
    ExecutePackageDependency = 13,
    LoadCompatiblePackage = 14,
    CleanPackage = 15,
    LaunchApprovedExe = 16,
    LayoutBundle = 17,
    CacheOrLayoutContainerOrPayload = 18,
    CacheCleanup = 19,
    ExecuteProgress = 20,
    ExecuteError = 21,
    ExecuteMsiMessage = 22,
    ExecuteFilesInUse = 23,
    LaunchApprovedExeProcessId = 24,
    Log = 25,
    Result = 26,
}

/// Control-plane requests, sent controller to companion.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlMessage {
    /// Begins an elevated apply session.
    ApplyInitialize,
    /// Ends an elevated apply session.
    ApplyUninitialize,
    /// Begins a per-user/per-machine registration session.
    SessionBegin {
        /// `true` if this is a resumed (not fresh) session.
        resume: bool,
    },
    /// Resumes a previously suspended session.
    SessionResume,
    /// Ends the session, recording final installed state.
    SessionEnd {
        /// `true` if the bundle is considered installed afterward.
        installed: bool,
    },
    /// Persists the variable store snapshot.
    SaveState {
        /// Variables to persist.
        variables: Vec<SerializedVariable>,
    },
    /// Registers or unregisters this bundle as a dependent of another.
    ProcessDependentRegistration {
        /// Provider key of the package depended upon.
        provider_key: String,
        /// `true` to register, `false` to unregister.
        register: bool,
    },
    /// Executes an exe-package action.
    ExecuteExePackage {
        /// Package id (`state::package::PackageId` as a raw `u32`).
        package_id: u32,
        /// Path to the executable.
        path: String,
        /// Command-line arguments, already variable-expanded.
        arguments: String,
    },
    /// Executes a native-installer (MSI-equivalent) package action.
    ExecuteMsiPackage {
        /// Package id.
        package_id: u32,
        /// Action name, e.g. `"install"`/`"uninstall"`/`"repair"`.
        action: String,
    },
    /// Executes a patch (MSP-equivalent) package action.
    ExecuteMspPackage {
        /// Package id.
        package_id: u32,
        /// Target product provider keys this patch applies to.
        target_provider_keys: Vec<String>,
    },
    /// Executes an OS-update package action.
    ExecuteMsuPackage {
        /// Package id.
        package_id: u32,
    },
    /// Registers/unregisters a package-provider key.
    ExecutePackageProvider {
        /// Package id.
        package_id: u32,
        /// `true` to register, `false` to unregister.
        register: bool,
    },
    /// Registers/unregisters a package dependency.
    ExecutePackageDependency {
        /// Package id.
        package_id: u32,
        /// Dependency provider key.
        dependency_key: String,
        /// `true` to register, `false` to unregister.
        register: bool,
    },
    /// Loads a compatible package's prior state before upgrade.
    LoadCompatiblePackage {
        /// Package id.
        package_id: u32,
    },
    /// Phase C cleanup for one package.
    CleanPackage {
        /// Package id.
        package_id: u32,
    },
    /// Launches a pre-approved executable by its elevated id.
    LaunchApprovedExe {
        /// Approved-exe id.
        approved_exe_id: String,
        /// Arguments to pass through.
        arguments: String,
    },
}

impl ControlMessage {
    /// Wire discriminant for this message.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ApplyInitialize => MessageType::ApplyInitialize,
            Self::ApplyUninitialize => MessageType::ApplyUninitialize,
            Self::SessionBegin { .. } => MessageType::SessionBegin,
            Self::SessionResume => MessageType::SessionResume,
            Self::SessionEnd { .. } => MessageType::SessionEnd,
            Self::SaveState { .. } => MessageType::SaveState,
            Self::ProcessDependentRegistration { .. } => MessageType::ProcessDependentRegistration,
            Self::ExecuteExePackage { .. } => MessageType::ExecuteExePackage,
            Self::ExecuteMsiPackage { .. } => MessageType::ExecuteMsiPackage,
            Self::ExecuteMspPackage { .. } => MessageType::ExecuteMspPackage,
            Self::ExecuteMsuPackage { .. } => MessageType::ExecuteMsuPackage,
            Self::ExecutePackageProvider { .. } => MessageType::ExecutePackageProvider,
            Self::ExecutePackageDependency { .. } => MessageType::ExecutePackageDependency,
            Self::LoadCompatiblePackage { .. } => MessageType::LoadCompatiblePackage,
            Self::CleanPackage { .. } => MessageType::CleanPackage,
            Self::LaunchApprovedExe { .. } => MessageType::LaunchApprovedExe,
        }
    }

    /// Encodes this message's payload (not including the pipe frame
    /// header, which carries [`Self::message_type`] separately).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Self::ApplyInitialize | Self::ApplyUninitialize | Self::SessionResume => {}
            Self::SessionBegin { resume } => w.write_u32(u32::from(*resume)),
            Self::SessionEnd { installed } => w.write_u32(u32::from(*installed)),
            Self::SaveState { variables } => w.write_bytes(&serialize(variables)),
            Self::ProcessDependentRegistration { provider_key, register } => {
                w.write_string(provider_key);
                w.write_u32(u32::from(*register));
            }
            Self::ExecuteExePackage { package_id, path, arguments } => {
                w.write_u32(*package_id);
                w.write_string(path);
                w.write_string(arguments);
            }
            Self::ExecuteMsiPackage { package_id, action } => {
                w.write_u32(*package_id);
                w.write_string(action);
            }
            Self::ExecuteMspPackage { package_id, target_provider_keys } => {
                w.write_u32(*package_id);
                w.write_u32(u32::try_from(target_provider_keys.len()).unwrap_or(u32::MAX));
                for key in target_provider_keys {
                    w.write_string(key);
                }
            }
            Self::ExecuteMsuPackage { package_id }
            | Self::LoadCompatiblePackage { package_id }
            | Self::CleanPackage { package_id } => w.write_u32(*package_id),
            Self::ExecutePackageProvider { package_id, register } => {
                w.write_u32(*package_id);
                w.write_u32(u32::from(*register));
            }
            Self::ExecutePackageDependency { package_id, dependency_key, register } => {
                w.write_u32(*package_id);
                w.write_string(dependency_key);
                w.write_u32(u32::from(*register));
            }
            Self::LaunchApprovedExe { approved_exe_id, arguments } => {
                w.write_string(approved_exe_id);
                w.write_string(arguments);
            }
        }
        w.into_bytes()
    }

    /// Decodes a message of the given `message_type` from `bytes`.
    ///
    /// # Errors
    /// Returns [`EngineError::ShortRead`]/[`EngineError::CorruptFormat`]
    /// on malformed input.
    pub fn decode(message_type: MessageType, bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        Ok(match message_type {
            MessageType::ApplyInitialize => Self::ApplyInitialize,
            MessageType::ApplyUninitialize => Self::ApplyUninitialize,
            MessageType::SessionBegin => Self::SessionBegin { resume: r.read_u32()? != 0 },
            MessageType::SessionResume => Self::SessionResume,
            MessageType::SessionEnd => Self::SessionEnd { installed: r.read_u32()? != 0 },
            MessageType::SaveState => Self::SaveState { variables: deserialize(r.read_bytes(r.remaining())?)? },
            MessageType::ProcessDependentRegistration => Self::ProcessDependentRegistration {
                provider_key: r.read_string()?,
                register: r.read_u32()? != 0,
            },
            MessageType::ExecuteExePackage => Self::ExecuteExePackage {
                package_id: r.read_u32()?,
                path: r.read_string()?,
                arguments: r.read_string()?,
            },
            MessageType::ExecuteMsiPackage => {
                Self::ExecuteMsiPackage { package_id: r.read_u32()?, action: r.read_string()? }
            }
            MessageType::ExecuteMspPackage => {
                let package_id = r.read_u32()?;
                let count = r.read_u32()?;
                let mut target_provider_keys = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    target_provider_keys.push(r.read_string()?);
                }
                Self::ExecuteMspPackage { package_id, target_provider_keys }
            }
            MessageType::ExecuteMsuPackage => Self::ExecuteMsuPackage { package_id: r.read_u32()? },
            MessageType::ExecutePackageProvider => {
                Self::ExecutePackageProvider { package_id: r.read_u32()?, register: r.read_u32()? != 0 }
            }
            MessageType::ExecutePackageDependency => Self::ExecutePackageDependency {
                package_id: r.read_u32()?,
                dependency_key: r.read_string()?,
                register: r.read_u32()? != 0,
            },
            MessageType::LoadCompatiblePackage => Self::LoadCompatiblePackage { package_id: r.read_u32()? },
            MessageType::CleanPackage => Self::CleanPackage { package_id: r.read_u32()? },
            MessageType::LaunchApprovedExe => {
                Self::LaunchApprovedExe { approved_exe_id: r.read_string()?, arguments: r.read_string()? }
            }
            other => {
                return Err(EngineError::CorruptFormat {
                    what: format!("{other:?} is not a control-plane message"),
                    path: None,
                })
            }
        })
    }
}

/// Cache-plane requests, sent controller to companion.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheMessage {
    /// Copies the whole bundle image to a destination directory.
    LayoutBundle {
        /// Destination directory.
        destination_dir: String,
    },
    /// Acquires and/or lays out a container or payload.
    CacheOrLayoutContainerOrPayload {
        /// Payload or container key.
        key: String,
        /// Destination path.
        destination: String,
        /// `true` to copy into the layout location rather than the
        /// cache.
        layout_only: bool,
    },
    /// Removes stale cache entries for packages no longer referenced.
    CacheCleanup {
        /// Package ids still referenced and not to be removed.
        live_package_ids: Vec<u32>,
    },
}

impl CacheMessage {
    /// Wire discriminant for this message.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::LayoutBundle { .. } => MessageType::LayoutBundle,
            Self::CacheOrLayoutContainerOrPayload { .. } => MessageType::CacheOrLayoutContainerOrPayload,
            Self::CacheCleanup { .. } => MessageType::CacheCleanup,
        }
    }

    /// Encodes this message's payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Self::LayoutBundle { destination_dir } => w.write_string(destination_dir),
            Self::CacheOrLayoutContainerOrPayload { key, destination, layout_only } => {
                w.write_string(key);
                w.write_string(destination);
                w.write_u32(u32::from(*layout_only));
            }
            Self::CacheCleanup { live_package_ids } => {
                w.write_u32(u32::try_from(live_package_ids.len()).unwrap_or(u32::MAX));
                for id in live_package_ids {
                    w.write_u32(*id);
                }
            }
        }
        w.into_bytes()
    }

    /// Decodes a message of the given `message_type` from `bytes`.
    ///
    /// # Errors
    /// As [`ControlMessage::decode`].
    pub fn decode(message_type: MessageType, bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        Ok(match message_type {
            MessageType::LayoutBundle => Self::LayoutBundle { destination_dir: r.read_string()? },
            MessageType::CacheOrLayoutContainerOrPayload => Self::CacheOrLayoutContainerOrPayload {
                key: r.read_string()?,
                destination: r.read_string()?,
                layout_only: r.read_u32()? != 0,
            },
            MessageType::CacheCleanup => {
                let count = r.read_u32()?;
                let mut live_package_ids = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    live_package_ids.push(r.read_u32()?);
                }
                Self::CacheCleanup { live_package_ids }
            }
            other => {
                return Err(EngineError::CorruptFormat {
                    what: format!("{other:?} is not a cache-plane message"),
                    path: None,
                })
            }
        })
    }
}

/// Asynchronous progress/log callbacks, sent companion to controller
/// outside the request/response cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum CallbackMessage {
    /// Overall execute progress tick update.
    ExecuteProgress {
        /// Package id this tick belongs to.
        package_id: u32,
        /// Progress percentage, 0-100.
        progress_percentage: u32,
    },
    /// A non-fatal error occurred executing a package, offered to the
    /// UI for retry/ignore/abort.
    ExecuteError {
        /// Package id.
        package_id: u32,
        /// Error code reported by the driver/installer.
        error_code: i32,
        /// Human-readable message.
        message: String,
    },
    /// A raw installer message line (native-installer backends only).
    ExecuteMsiMessage {
        /// Package id.
        package_id: u32,
        /// Message text.
        message: String,
    },
    /// Files-in-use prompt: the installer found files locked by
    /// running processes.
    ExecuteFilesInUse {
        /// Package id.
        package_id: u32,
        /// Process names holding the files open.
        process_names: Vec<String>,
    },
    /// Reports the process id of a launched approved exe.
    LaunchApprovedExeProcessId {
        /// OS process id.
        process_id: u32,
    },
    /// A structured log line forwarded from the companion.
    Log {
        /// Log message text.
        message: String,
    },
}

impl CallbackMessage {
    /// Wire discriminant for this message.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ExecuteProgress { .. } => MessageType::ExecuteProgress,
            Self::ExecuteError { .. } => MessageType::ExecuteError,
            Self::ExecuteMsiMessage { .. } => MessageType::ExecuteMsiMessage,
            Self::ExecuteFilesInUse { .. } => MessageType::ExecuteFilesInUse,
            Self::LaunchApprovedExeProcessId { .. } => MessageType::LaunchApprovedExeProcessId,
            Self::Log { .. } => MessageType::Log,
        }
    }

    /// Encodes this message's payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Self::ExecuteProgress { package_id, progress_percentage } => {
                w.write_u32(*package_id);
                w.write_u32(*progress_percentage);
            }
            Self::ExecuteError { package_id, error_code, message } => {
                w.write_u32(*package_id);
                w.write_i32(*error_code);
                w.write_string(message);
            }
            Self::ExecuteMsiMessage { package_id, message } => {
                w.write_u32(*package_id);
                w.write_string(message);
            }
            Self::ExecuteFilesInUse { package_id, process_names } => {
                w.write_u32(*package_id);
                w.write_u32(u32::try_from(process_names.len()).unwrap_or(u32::MAX));
                for name in process_names {
                    w.write_string(name);
                }
            }
            Self::LaunchApprovedExeProcessId { process_id } => w.write_u32(*process_id),
            Self::Log { message } => w.write_string(message),
        }
        w.into_bytes()
    }

    /// Decodes a message of the given `message_type` from `bytes`.
    ///
    /// # Errors
    /// As [`ControlMessage::decode`].
    pub fn decode(message_type: MessageType, bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        Ok(match message_type {
            MessageType::ExecuteProgress => {
                Self::ExecuteProgress { package_id: r.read_u32()?, progress_percentage: r.read_u32()? }
            }
            MessageType::ExecuteError => Self::ExecuteError {
                package_id: r.read_u32()?,
                error_code: r.read_i32()?,
                message: r.read_string()?,
            },
            MessageType::ExecuteMsiMessage => {
                Self::ExecuteMsiMessage { package_id: r.read_u32()?, message: r.read_string()? }
            }
            MessageType::ExecuteFilesInUse => {
                let package_id = r.read_u32()?;
                let count = r.read_u32()?;
                let mut process_names = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    process_names.push(r.read_string()?);
                }
                Self::ExecuteFilesInUse { package_id, process_names }
            }
            MessageType::LaunchApprovedExeProcessId => {
                Self::LaunchApprovedExeProcessId { process_id: r.read_u32()? }
            }
            MessageType::Log => Self::Log { message: r.read_string()? },
            other => {
                return Err(EngineError::CorruptFormat {
                    what: format!("{other:?} is not a callback message"),
                    path: None,
                })
            }
        })
    }
}

/// The response every control-plane or cache-plane request gets back:
/// an `HRESULT`-style result normalized to `Result<(), EngineError>`
/// plus the accumulated [`RestartState`], per §4.8.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseMessage {
    /// `true` if the action succeeded.
    pub ok: bool,
    /// Result code, `0` on success.
    pub code: i32,
    /// Restart implication of the completed action.
    pub restart: RestartState,
    /// Human-readable detail, populated on failure.
    pub detail: String,
}

impl ResponseMessage {
    /// Builds a success response with no restart implication.
    #[must_use]
    pub fn ok() -> Self {
        Self { ok: true, code: 0, restart: RestartState::None, detail: String::new() }
    }

    /// Builds a success response carrying a restart implication.
    #[must_use]
    pub fn ok_with_restart(restart: RestartState) -> Self {
        Self { ok: true, code: 0, restart, detail: String::new() }
    }

    /// Builds a failure response from a code and detail message.
    #[must_use]
    pub fn failure(code: i32, detail: impl Into<String>) -> Self {
        Self { ok: false, code, restart: RestartState::None, detail: detail.into() }
    }

    /// Encodes this response.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(u32::from(self.ok));
        w.write_i32(self.code);
        w.write_u32(self.restart.tag());
        w.write_string(&self.detail);
        w.into_bytes()
    }

    /// Decodes a response.
    ///
    /// # Errors
    /// As [`ControlMessage::decode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            ok: r.read_u32()? != 0,
            code: r.read_i32()?,
            restart: RestartState::from_tag(r.read_u32()?)?,
            detail: r.read_string()?,
        })
    }

    /// Converts this response into a [`crate::error::Result`],
    /// folding a failure into [`EngineError::ChildFailed`].
    ///
    /// # Errors
    /// Returns [`EngineError::ChildFailed`] if `self.ok` is `false`.
    pub fn into_result(self, action: impl Into<String>) -> Result<RestartState> {
        if self.ok {
            Ok(self.restart)
        } else {
            Err(EngineError::ChildFailed { action: action.into(), code: self.code })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_message_round_trips() {
        let msg = ControlMessage::ExecuteExePackage {
            package_id: 5,
            path: "C:\\setup.exe".to_string(),
            arguments: "/quiet".to_string(),
        };
        let bytes = msg.encode();
        let decoded = ControlMessage::decode(msg.message_type(), &bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn save_state_round_trips_variables() {
        let msg = ControlMessage::SaveState {
            variables: vec![SerializedVariable {
                name: "X".to_string(),
                value: crate::variant::Variant::Numeric(3),
                literal: false,
            }],
        };
        let bytes = msg.encode();
        let decoded = ControlMessage::decode(MessageType::SaveState, &bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn cache_message_round_trips() {
        let msg = CacheMessage::CacheCleanup { live_package_ids: vec![1, 2, 3] };
        let bytes = msg.encode();
        let decoded = CacheMessage::decode(msg.message_type(), &bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn callback_message_round_trips() {
        let msg =
            CallbackMessage::ExecuteFilesInUse { package_id: 2, process_names: vec!["app.exe".to_string()] };
        let bytes = msg.encode();
        let decoded = CallbackMessage::decode(msg.message_type(), &bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn response_round_trips_and_folds_failure() {
        let response = ResponseMessage::failure(5, "boom");
        let bytes = response.encode();
        let decoded = ResponseMessage::decode(&bytes).unwrap();
        assert_eq!(decoded, response);
        let err = decoded.into_result("execute").unwrap_err();
        assert!(matches!(err, EngineError::ChildFailed { code: 5, .. }));
    }

    #[test]
    fn response_ok_with_restart_round_trips() {
        let response = ResponseMessage::ok_with_restart(RestartState::Required);
        let bytes = response.encode();
        let decoded = ResponseMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.into_result("execute").unwrap(), RestartState::Required);
    }

    #[test]
    fn wrong_family_decode_is_rejected() {
        let err = ControlMessage::decode(MessageType::ExecuteProgress, &[]).unwrap_err();
        assert!(matches!(err, EngineError::CorruptFormat { .. }));
    }
}
