//! Spawning detached daemon processes and signalling them.
//!
//! A daemon is started in its own session (Unix) or as a detached process
//! with its own process group (Windows), with stdin closed and stdout/stderr
//! appended to its log sink. It keeps running if the supervisor exits.
//!
//! The [`Launcher`] trait is the seam tests replace with an in-memory fake.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as platform;
#[cfg(windows)]
use windows as platform;

use crate::config::DaemonSpec;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;

/// Environment variable set in every daemon's environment to its own name.
pub const DAEMON_NAME_ENV: &str = "WARDEN_DAEMON";

/// The program and arguments a daemon was spawned with.
///
/// Stored next to the PID so a later liveness check can tell the daemon apart
/// from an unrelated process that inherited a recycled PID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSignature {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSignature {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_spec(spec: &DaemonSpec) -> Self {
        Self::new(spec.command.clone(), spec.args.iter().cloned())
    }

    /// File name of the program without directories or a `.exe` suffix.
    pub fn program_name(&self) -> &str {
        executable_stem(&self.program)
    }
}

impl fmt::Display for CommandSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Strip directories and a trailing `.exe` from a program path.
pub fn executable_stem(program: &str) -> &str {
    let base = program
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(program);
    if let Some(cut) = base.len().checked_sub(4) {
        if base
            .get(cut..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(".exe"))
        {
            return &base[..cut];
        }
    }
    base
}

/// A freshly spawned daemon process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub signature: CommandSignature,
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("executable '{program}' not found")]
    NotFound {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("permission denied executing '{program}'")]
    PermissionDenied {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("system resources exhausted while spawning '{program}': {source}")]
    ResourceExhausted {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot open log file '{}': {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' started but the OS reported no PID")]
    MissingPid { program: String },
}

impl SpawnError {
    pub fn from_io(program: &str, source: io::Error) -> Self {
        let program = program.to_string();
        match source.kind() {
            io::ErrorKind::NotFound => SpawnError::NotFound { program, source },
            io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied { program, source },
            _ if is_resource_exhaustion(&source) => {
                SpawnError::ResourceExhausted { program, source }
            }
            _ => SpawnError::Io { program, source },
        }
    }
}

fn is_resource_exhaustion(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::OutOfMemory | io::ErrorKind::WouldBlock
    ) {
        return true;
    }
    err.raw_os_error()
        .is_some_and(platform::is_resource_exhaustion_code)
}

/// Starts and signals daemon processes.
pub trait Launcher: Send + Sync {
    /// Start a detached instance of `spec`. Must not block on the child.
    fn spawn(&self, spec: &DaemonSpec) -> std::result::Result<ProcessHandle, SpawnError>;

    /// Ask the process to exit.
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Kill the process without giving it a chance to clean up.
    fn force_kill(&self, pid: u32) -> Result<()>;
}

/// Launches daemons as real OS processes.
///
/// Must be used from inside a Tokio runtime: dropped children are reaped in
/// the background by the runtime once they exit.
#[derive(Debug, Clone)]
pub struct SystemLauncher {
    log_dir: PathBuf,
    work_dir: PathBuf,
}

impl SystemLauncher {
    /// `work_dir` is the base for relative `cwd` values, normally the
    /// directory containing the config file.
    pub fn new(log_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", name))
    }

    fn resolve_cwd(&self, spec: &DaemonSpec) -> PathBuf {
        match spec.cwd.as_deref() {
            Some(cwd) if Path::new(cwd).is_absolute() => PathBuf::from(cwd),
            Some(cwd) => self.work_dir.join(cwd),
            None => self.work_dir.clone(),
        }
    }
}

impl Launcher for SystemLauncher {
    fn spawn(&self, spec: &DaemonSpec) -> std::result::Result<ProcessHandle, SpawnError> {
        let log_path = self.log_path(&spec.name);
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|source| SpawnError::LogFile {
                path: log_path.clone(),
                source,
            })?;
        let stderr = stdout.try_clone().map_err(|source| SpawnError::LogFile {
            path: log_path.clone(),
            source,
        })?;

        let mut cmd = tokio::process::Command::new(&spec.command);
        cmd.args(&spec.args)
            .current_dir(self.resolve_cwd(spec))
            .envs(&spec.environment)
            .env(DAEMON_NAME_ENV, &spec.name)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false);
        platform::detach(&mut cmd);

        let child = cmd.spawn().map_err(|e| {
            tracing::error!("Failed to spawn daemon '{}': {}", spec.name, e);
            SpawnError::from_io(&spec.command, e)
        })?;

        let pid = child.id().ok_or_else(|| SpawnError::MissingPid {
            program: spec.command.clone(),
        })?;
        tracing::debug!(
            "Spawned daemon '{}' as PID {} (log: {})",
            spec.name,
            pid,
            log_path.display()
        );

        // Not awaited: the daemon outlives this handle.
        drop(child);

        Ok(ProcessHandle {
            pid,
            signature: CommandSignature::for_spec(spec),
        })
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        platform::terminate(pid)
    }

    fn force_kill(&self, pid: u32) -> Result<()> {
        platform::force_kill(pid)
    }
}

/// Ask a single process (not its group) to exit. Used to signal a running
/// supervisor from `stop-all`.
pub fn terminate_process(pid: u32) -> Result<()> {
    platform::terminate_single(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executable_stem_strips_dirs_and_exe() {
        assert_eq!(executable_stem("/usr/bin/sleep"), "sleep");
        assert_eq!(executable_stem("C:\\tools\\worker.EXE"), "worker");
        assert_eq!(executable_stem("python3"), "python3");
        assert_eq!(executable_stem(".exe"), "");
    }

    #[test]
    fn signature_display_and_serde() {
        let sig = CommandSignature::new("/usr/bin/python3", ["worker.py", "--queue=a"]);
        assert_eq!(sig.to_string(), "/usr/bin/python3 worker.py --queue=a");
        assert_eq!(sig.program_name(), "python3");

        let json = serde_json::to_string(&sig).unwrap();
        let back: CommandSignature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn spawn_errors_are_classified() {
        let err = SpawnError::from_io("nope", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, SpawnError::NotFound { .. }));
        let err = SpawnError::from_io("nope", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, SpawnError::PermissionDenied { .. }));
        let err = SpawnError::from_io("nope", io::Error::from(io::ErrorKind::WouldBlock));
        assert!(matches!(err, SpawnError::ResourceExhausted { .. }));
        let err = SpawnError::from_io("nope", io::Error::other("weird"));
        assert!(matches!(err, SpawnError::Io { .. }));
    }

    #[tokio::test]
    async fn missing_executable_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = SystemLauncher::new(dir.path(), dir.path());
        let spec = DaemonSpec::new("ghost", "/definitely/not/a/real/binary-xyz");

        let err = launcher.spawn(&spec).unwrap_err();
        assert!(matches!(err, SpawnError::NotFound { .. }), "got {:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_daemon_writes_to_its_log() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = SystemLauncher::new(dir.path(), dir.path());
        let spec = DaemonSpec::new("echoer", "sh").with_args(["-c", "echo hello from $WARDEN_DAEMON"]);

        let handle = launcher.spawn(&spec).unwrap();
        assert!(handle.pid > 1);
        assert_eq!(handle.signature.program, "sh");

        let log = launcher.log_path("echoer");
        let mut contents = String::new();
        for _ in 0..50 {
            contents = std::fs::read_to_string(&log).unwrap_or_default();
            if contents.contains("hello") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert_eq!(contents.trim(), "hello from echoer");
    }
}
