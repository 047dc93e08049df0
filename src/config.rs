//! Engine tuning knobs.
//!
//! The source engine has no end-user configuration file -- its
//! configuration surface is the command line (see [`crate::args`]) plus
//! the manifest, an external collaborator. The handful of constants the
//! source hardcodes (verify-retry bound, progress poll interval, pipe
//! connect timeout) are collected here instead, following the same
//! "defaults, then environment override" shape the teacher crate uses
//! for its own settings layer.

use std::env;
use std::time::Duration;

/// Tunable engine constants.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Maximum number of verify-tryagain attempts per payload before
    /// surfacing to the bootstrapper UI. Source default: 2.
    pub verify_retry_limit: u32,
    /// Polling interval used by progress-wait loops that do not have a
    /// dedicated wake signal.
    pub progress_poll_interval: Duration,
    /// How long the controller waits for the companion process to
    /// connect and complete the pipe handshake before giving up.
    pub pipe_connect_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            verify_retry_limit: 2,
            progress_poll_interval: Duration::from_millis(500),
            pipe_connect_timeout: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Builds configuration from defaults, overridden field-by-field by
    /// environment variables when present and parseable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Some(v) = env_u32("BUNDLE_ENGINE_VERIFY_RETRY_LIMIT") {
            out.verify_retry_limit = v;
        }
        if let Some(ms) = env_u64("BUNDLE_ENGINE_PROGRESS_POLL_MS") {
            out.progress_poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("BUNDLE_ENGINE_PIPE_CONNECT_TIMEOUT_SECS") {
            out.pipe_connect_timeout = Duration::from_secs(secs);
        }

        out
    }
}

fn env_u32(name: &str) -> Option<u32> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.verify_retry_limit, 2);
        assert_eq!(cfg.progress_poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn env_override_applies() {
        let _guard = crate::global_test_mutex_lock();
        // SAFETY: serialized by global_test_mutex_lock, no other thread
        // reads/writes this process's environment concurrently.
        unsafe {
            env::set_var("BUNDLE_ENGINE_VERIFY_RETRY_LIMIT", "7");
        }
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.verify_retry_limit, 7);
        unsafe {
            env::remove_var("BUNDLE_ENGINE_VERIFY_RETRY_LIMIT");
        }
    }
}
