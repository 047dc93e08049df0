//! Reference binary entrypoint.
//!
//! This binary exercises the crate's own argument grammar and logging
//! setup and, for `-elevated`, runs the companion side of the pipe
//! protocol to completion. It deliberately stops short of driving a
//! real install: populating a [`bundle_engine::state::BundleState`]
//! from a bundle's embedded manifest is an external collaborator's job
//! (`spec.md` 1), so the controller branch below has no packages to
//! detect/plan/apply and says so rather than pretending otherwise.

use std::os::unix::net::UnixStream;

use bundle_engine::args::{Action, Args};
use bundle_engine::elevation::{serve, StdElevationHandler};
use bundle_engine::logging::{self, LogConfig};
use bundle_engine::pipe::{decode_secret_hex, PipeTransport};
use bundle_engine::EngineError;

/// Exit codes named by `spec.md` 6. `INSTALL_USEREXIT` is part of the
/// contract every embedding host must honor even though this
/// reference binary, having no interactive UI of its own, never
/// produces it.
mod exit_code {
    /// `ERROR_SUCCESS`.
    pub const SUCCESS: i32 = 0;
    /// `ERROR_INSTALL_FAILURE`.
    pub const INSTALL_FAILURE: i32 = 1603;
    /// `ERROR_INSTALL_USEREXIT`.
    #[allow(dead_code)]
    pub const INSTALL_USEREXIT: i32 = 1602;
    /// `ERROR_SUCCESS_REBOOT_REQUIRED`.
    pub const SUCCESS_REBOOT_REQUIRED: i32 = 3010;
    /// `ERROR_SUCCESS_REBOOT_INITIATED`.
    pub const SUCCESS_REBOOT_INITIATED: i32 = 1641;
}

fn main() {
    let args = match Args::parse_from_env() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("bundle-engine: {err}");
            std::process::exit(exit_code::INSTALL_FAILURE);
        }
    };

    let log_config = LogConfig {
        path: args.log_path.clone(),
        mode: args.log_mode,
        level: if matches!(args.display, bundle_engine::args::Display::None) {
            tracing::Level::WARN
        } else {
            tracing::Level::INFO
        },
    };
    if let Err(err) = logging::init(&log_config) {
        eprintln!("bundle-engine: failed to initialize logging: {err}");
    }

    let code = if let Some(connection) = &args.elevated {
        run_elevated(connection)
    } else {
        run_controller(&args)
    };
    std::process::exit(code);
}

/// Companion side of `-elevated <pipe> <secret> <pid>`: connects back
/// to the controller's listening socket, completes the handshake, and
/// pumps requests until the controller ends the session.
fn run_elevated(connection: &bundle_engine::args::PipeConnection) -> i32 {
    tracing::info!(pipe = %connection.pipe_name, parent_pid = connection.parent_pid, "elevated companion starting");

    let channel = match UnixStream::connect(&connection.pipe_name) {
        Ok(channel) => channel,
        Err(source) => {
            let err = EngineError::Io { action: format!("connecting to {}", connection.pipe_name), source };
            tracing::error!(%err, "elevated companion could not connect");
            return exit_code::INSTALL_FAILURE;
        }
    };
    let mut transport = PipeTransport::new(channel);
    let secret = decode_secret_hex(&connection.secret_hex);
    if let Err(err) = transport.handshake(&secret) {
        tracing::error!(%err, "elevated companion handshake failed");
        return exit_code::INSTALL_FAILURE;
    }

    let mut handler = StdElevationHandler::new();
    match serve(&mut transport, &mut handler) {
        Ok(restart) => restart_to_exit_code(restart),
        Err(err) => {
            tracing::error!(%err, "elevated companion session ended with an error");
            exit_code::INSTALL_FAILURE
        }
    }
}

/// Top-level (non-elevated) invocation. Without a manifest-parsing
/// collaborator there is no package table to detect/plan/apply;
/// `-?`/`-h` still prints usage successfully since it never needed
/// one.
fn run_controller(args: &Args) -> i32 {
    match &args.action {
        Action::Help => {
            print_help();
            exit_code::SUCCESS
        }
        other => {
            tracing::error!(
                action = ?other,
                "no manifest-parsing collaborator is wired into this reference binary; \
                 embed bundle_engine::controller::Controller in a host that supplies one"
            );
            exit_code::INSTALL_FAILURE
        }
    }
}

/// Maps a pipe session's accumulated restart state to its exit code.
fn restart_to_exit_code(restart: bundle_engine::elevation::RestartState) -> i32 {
    match restart {
        bundle_engine::elevation::RestartState::None => exit_code::SUCCESS,
        bundle_engine::elevation::RestartState::Required => exit_code::SUCCESS_REBOOT_REQUIRED,
        bundle_engine::elevation::RestartState::Initiated => exit_code::SUCCESS_REBOOT_INITIATED,
    }
}

/// Prints the switch summary for `-?`/`-h`/`-help`.
fn print_help() {
    println!("bundle-engine [-?|-h|-help] [-uninstall|-repair|-modify|-layout [dir]]");
    println!("              [-quiet|-passive] [-norestart|-forcerestart|-promptrestart]");
    println!("              [-l|-log|-log+ <path>] [NAME=VALUE ...]");
}
