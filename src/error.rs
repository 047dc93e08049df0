//! Engine-wide error type.
//!
//! Every public operation in this crate returns [`Result<T>`]. Internal
//! helpers propagate [`EngineError`] unchanged; public verbs (the four
//! [`crate::controller`] lifecycle verbs, and each package driver's
//! `detect`/`plan`/`execute`) add one layer of context -- an action
//! name, a package id, or a path -- rather than a fresh error kind.

use std::fmt;
use std::path::PathBuf;

/// The fixed set of error kinds this engine can produce.
///
/// This mirrors the source engine's `HRESULT` vocabulary narrowed down
/// to the kinds actually distinguished by callers, per the
/// specification's error handling design.
#[derive(Debug)]
pub enum EngineError {
    /// A command-line switch or manifest value was not well-formed.
    InvalidArgument {
        /// What was wrong with it.
        detail: String,
    },
    /// A named thing (variable, package, container, payload) does not
    /// exist.
    NotFound {
        /// Human-readable description of what was being looked up.
        what: String,
    },
    /// An attempt to create something that is already present.
    AlreadyExists {
        /// Human-readable description of the duplicate.
        what: String,
    },
    /// A filesystem or OS I/O operation failed.
    Io {
        /// What the engine was trying to do.
        action: String,
        /// The underlying OS error.
        source: std::io::Error,
    },
    /// A buffer read ran past the end of its backing bytes.
    ShortRead {
        /// Byte offset at which the read was attempted.
        offset: usize,
        /// Number of bytes requested.
        requested: usize,
        /// Total length of the backing buffer.
        available: usize,
    },
    /// A parsed structure failed a format invariant.
    CorruptFormat {
        /// What failed to parse.
        what: String,
        /// Path of the file being parsed, if applicable.
        path: Option<PathBuf>,
    },
    /// The bundle's in-file section and in-memory section disagree, or
    /// a pipe handshake secret did not match.
    Tampered {
        /// What comparison failed.
        detail: String,
    },
    /// The caller lacks permission to perform the operation.
    AccessDenied {
        /// What was denied.
        detail: String,
    },
    /// A second instance of a scope-exclusive operation is already
    /// running.
    AlreadyRunning {
        /// The scope that is already running (per-user/per-machine).
        scope: String,
    },
    /// The engine's single activity token is already held.
    Busy,
    /// A wait exceeded its deadline.
    Timeout {
        /// What the engine was waiting for.
        waiting_on: String,
    },
    /// The bootstrapper UI (or the user) chose to exit.
    UserExit,
    /// An in-flight operation was cancelled.
    Cancelled,
    /// A [`crate::variant::Variant`] type conversion was not
    /// representable.
    TypeMismatch {
        /// Source type name.
        from: &'static str,
        /// Target type name.
        to: &'static str,
    },
    /// A write to a `builtin` variable was attempted without the
    /// privileged override path.
    BuiltinReadonly {
        /// Name of the variable.
        name: String,
    },
    /// The operation completed but a reboot is required before it
    /// takes effect. Terminal success, not a failure.
    RebootRequired,
    /// The operation completed and has already scheduled a reboot.
    /// Terminal success, not a failure.
    RebootInitiated,
    /// The elevated companion process reported a failure executing an
    /// action on the controller's behalf.
    ChildFailed {
        /// Action name that failed in the child.
        action: String,
        /// Result code the child reported.
        code: i32,
    },
    /// A feature named by the specification is intentionally not yet
    /// wired up.
    NotImplemented {
        /// What is missing.
        what: String,
    },
    /// Anything not covered by a more specific kind.
    Unexpected {
        /// Description of the failure.
        detail: String,
    },
}

impl EngineError {
    /// `true` for the three kinds the apply engine treats as terminal
    /// successes rather than failures that trigger rollback: user
    /// exit, cancellation, and the two reboot outcomes.
    #[must_use]
    pub fn is_terminal_success(&self) -> bool {
        matches!(
            self,
            Self::UserExit | Self::Cancelled | Self::RebootRequired | Self::RebootInitiated
        )
    }

    /// Adds one layer of context to an error, as the specification's
    /// propagation policy requires of every public verb.
    #[must_use]
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let context = context.into();
        match self {
            Self::Unexpected { detail } => Self::Unexpected {
                detail: format!("{context}: {detail}"),
            },
            other => Self::Unexpected {
                detail: format!("{context}: {other}"),
            },
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { detail } => write!(f, "invalid argument: {detail}"),
            Self::NotFound { what } => write!(f, "not found: {what}"),
            Self::AlreadyExists { what } => write!(f, "already exists: {what}"),
            Self::Io { action, source } => write!(f, "I/O error during {action}: {source}"),
            Self::ShortRead {
                offset,
                requested,
                available,
            } => write!(
                f,
                "short read at offset {offset}: requested {requested} bytes, {available} available"
            ),
            Self::CorruptFormat { what, path } => match path {
                Some(p) => write!(f, "corrupt format in {}: {what}", p.display()),
                None => write!(f, "corrupt format: {what}"),
            },
            Self::Tampered { detail } => write!(f, "tampered: {detail}"),
            Self::AccessDenied { detail } => write!(f, "access denied: {detail}"),
            Self::AlreadyRunning { scope } => write!(f, "another apply is already running for {scope}"),
            Self::Busy => write!(f, "the engine is busy with another verb"),
            Self::Timeout { waiting_on } => write!(f, "timed out waiting on {waiting_on}"),
            Self::UserExit => write!(f, "the user cancelled the operation"),
            Self::Cancelled => write!(f, "the operation was cancelled"),
            Self::TypeMismatch { from, to } => write!(f, "cannot convert {from} to {to}"),
            Self::BuiltinReadonly { name } => {
                write!(f, "variable {name} is builtin and cannot be written directly")
            }
            Self::RebootRequired => write!(f, "a reboot is required to complete the operation"),
            Self::RebootInitiated => write!(f, "a reboot has been initiated"),
            Self::ChildFailed { action, code } => {
                write!(f, "elevated action {action} failed with code {code}")
            }
            Self::NotImplemented { what } => write!(f, "not implemented: {what}"),
            Self::Unexpected { detail } => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            action: "unspecified".to_string(),
            source,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_success_kinds() {
        assert!(EngineError::UserExit.is_terminal_success());
        assert!(EngineError::Cancelled.is_terminal_success());
        assert!(EngineError::RebootRequired.is_terminal_success());
        assert!(EngineError::RebootInitiated.is_terminal_success());
        assert!(!EngineError::Busy.is_terminal_success());
    }

    #[test]
    fn context_wraps_message() {
        let err = EngineError::NotFound {
            what: "package Foo".to_string(),
        }
        .with_context("plan");
        assert!(err.to_string().contains("plan"));
        assert!(err.to_string().contains("package Foo"));
    }
}
