// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use crate::launcher::SpawnError;
use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(warden::config::validation),
        help("Run `warden validate` for detailed validation errors")
    )]
    Validation(String),

    #[error("Daemon not found: {0}")]
    #[diagnostic(
        code(warden::daemon::not_found),
        help("Check configured daemons with `warden status` or validate your warden.yaml")
    )]
    DaemonNotFound(String),

    #[error("Daemon '{0}' is declared more than once")]
    #[diagnostic(
        code(warden::registry::duplicate),
        help("Daemon names must be unique within warden.yaml")
    )]
    DuplicateDaemon(String),

    #[error("Failed to spawn daemon: {0}")]
    #[diagnostic(
        code(warden::launcher::spawn),
        help("Check that the command exists and is executable")
    )]
    Spawn(#[from] SpawnError),

    #[error("Failed to signal PID {pid}: {reason}")]
    #[diagnostic(code(warden::launcher::signal))]
    Signal { pid: u32, reason: String },

    #[error("Failed to persist state for '{name}': {reason}")]
    #[diagnostic(
        code(warden::state::persist),
        help("Check free disk space and permissions on the state directory")
    )]
    Persistence { name: String, reason: String },

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("Restart of '{name}' denied: {reason}")]
    #[diagnostic(
        code(warden::policy::denied),
        help("Wait for the cooldown or rate window to pass, then retry")
    )]
    RestartDenied { name: String, reason: String },

    #[error("Another supervisor is already running{}", .pid.map(|p| format!(" (PID {})", p)).unwrap_or_default())]
    #[diagnostic(
        code(warden::supervisor::already_running),
        help("Stop it first with `warden stop-all`")
    )]
    AlreadyRunning { pid: Option<u32> },

    #[error("Daemon '{name}' (PID {pid}) is still running after a forced kill")]
    #[diagnostic(code(warden::daemon::still_running))]
    StillRunning { name: String, pid: u32 },

    #[error("Daemon '{0}' is busy with another operation")]
    #[diagnostic(code(warden::daemon::busy))]
    Busy(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::DaemonNotFound(name) => Some(format!(
                "'{}' is not declared in warden.yaml. Run 'warden status' to list configured daemons.",
                name
            )),
            Error::Config(msg) if msg.contains("Could not find") => None,
            Error::Config(_) | Error::Validation(_) | Error::DuplicateDaemon(_) => {
                Some("Validate your config with: warden validate".to_string())
            }
            Error::Spawn(SpawnError::NotFound { program, .. }) => Some(format!(
                "'{}' was not found. Use an absolute path or make sure it is on PATH.",
                program
            )),
            Error::Spawn(SpawnError::PermissionDenied { program, .. }) => {
                Some(format!("Make '{}' executable: chmod +x {}", program, program))
            }
            Error::Persistence { .. } => Some(
                "The daemon was stopped again because its PID could not be recorded. It will be retried on the next health check.".to_string(),
            ),
            Error::RestartDenied { name, .. } => Some(format!(
                "See recent decisions with: warden status {}",
                name
            )),
            Error::AlreadyRunning { .. } => {
                Some("Stop the running supervisor with: warden stop-all".to_string())
            }
            Error::StillRunning { pid, .. } => Some(format!(
                "No new instance was started. Check PID {} manually before retrying.",
                pid
            )),
            Error::Busy(name) => Some(format!(
                "Another command is operating on '{}'. Retry in a few seconds.",
                name
            )),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates a u32 PID before it is used as a signal target.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
pub fn validate_pid(pid: u32, daemon_name: &str) -> Result<i32> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID 0 is invalid for daemon '{}' (refers to process group, not a process)",
                daemon_name
            ),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "refusing to operate on PID 1 (init) for daemon '{}'",
                daemon_name
            ),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID {} exceeds i32::MAX for daemon '{}', cannot convert safely",
                pid, daemon_name
            ),
        });
    }
    Ok(pid as i32)
}
