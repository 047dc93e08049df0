//! Logging setup.
//!
//! Like the teacher crate, this engine logs exclusively through the
//! `tracing` facade rather than the source engine's bespoke per-thread
//! "current pipe" logging object (see `spec.md` 9, "thread-local
//! storage for the current pipe during logging"). A logger is attached
//! once at process start; every subsequent `tracing::info!/debug!/...`
//! call is routed through it. Hidden variables are redacted by the
//! caller (formatting with [`crate::variables::VariableStore::get_formatted_obfuscated`])
//! before a value ever reaches a log line -- this module does not
//! attempt generic secret scrubbing.

use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// How the log file path switch was specified on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogMode {
    /// `-l` / `-log`: truncate and overwrite on open.
    Overwrite,
    /// `-log+`: append to an existing file.
    Append,
}

/// Resolved logging configuration derived from the command line.
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Primary log file path, if one was requested or defaulted.
    pub path: Option<PathBuf>,
    /// Overwrite vs. append semantics for `path`.
    pub mode: LogMode,
    /// Minimum level to emit, derived from `-q`/`-passive`/`-verbose`
    /// equivalents.
    pub level: tracing::Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: None,
            mode: LogMode::Overwrite,
            level: tracing::Level::INFO,
        }
    }
}

/// Installs a process-wide `tracing` subscriber per `config`.
///
/// # Errors
/// Returns an error if the requested log file cannot be opened.
pub fn init(config: &LogConfig) -> crate::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if let Some(path) = &config.path {
        let file = open_log_file(path, config.mode)?;
        builder
            .with_writer(file.with_max_level(config.level))
            .try_init()
            .map_err(|e| crate::EngineError::Unexpected {
                detail: format!("failed to install tracing subscriber: {e}"),
            })?;
    } else {
        builder
            .try_init()
            .map_err(|e| crate::EngineError::Unexpected {
                detail: format!("failed to install tracing subscriber: {e}"),
            })?;
    }

    Ok(())
}

fn open_log_file(path: &Path, mode: LogMode) -> crate::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| crate::EngineError::Io {
            action: format!("creating log directory {}", parent.display()),
            source,
        })?;
    }

    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(mode == LogMode::Append)
        .truncate(mode == LogMode::Overwrite)
        .open(path)
        .map_err(|source| crate::EngineError::Io {
            action: format!("opening log file {}", path.display()),
            source,
        })
}

/// Opens the `_Failed` companion log used when the primary log never
/// opened, per the specification's log-on-failure design: "if the
/// primary log never opened, the shutdown path opens a `_Failed`
/// companion log... so that the captured in-memory buffer flushes."
///
/// Returns the path actually opened, or `None` if even the companion
/// log could not be created (callers fall back to an OS event-log
/// style record via `tracing::error!` to stderr, which always
/// succeeds).
pub fn open_failure_log(primary: Option<&Path>) -> Option<PathBuf> {
    let base = primary.map_or_else(
        || std::env::temp_dir().join("bundle-engine.log"),
        Path::to_path_buf,
    );
    let mut failed = base.clone();
    let stem = failed
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bundle-engine".to_string());
    let ext = failed
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    failed.set_file_name(format!("{stem}_Failed.{ext}"));

    match open_log_file(&failed, LogMode::Append) {
        Ok(_) => Some(failed),
        Err(e) => {
            tracing::error!(error = %e, "failed to open failure companion log");
            None
        }
    }
}
