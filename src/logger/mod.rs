//! Supervisor log sinks.
//!
//! Each daemon has a sink at `logs/<name>.log` that receives the daemon's own
//! stdout/stderr plus supervisor lines about it. Every decision is also
//! appended to the aggregate `logs/supervisor.log` and mirrored to `tracing`.
//!
//! Writes never fail the caller: an entry that cannot be written is counted
//! in [`Logger::dropped_count`] and otherwise discarded.

mod rotation;

pub use rotation::{
    append_line, backup_path, rotate, rotate_if_needed, RotationPolicy, DEFAULT_BACKUPS,
    DEFAULT_MAX_BYTES,
};

use crate::error::Result;
use crate::state::AGGREGATE_SINK;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of lines returned by [`Logger::read_tail`].
pub const DEFAULT_TAIL_LINES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Decisions and lifecycle transitions recorded in the aggregate log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    Spawned,
    RestartAllowed,
    RestartDenied,
    SpawnFailed,
    PersistFailed,
    VerificationFailed,
    Exited,
    Stopped,
    ForceKilled,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::Spawned => "spawned",
            AuditEvent::RestartAllowed => "restart-allowed",
            AuditEvent::RestartDenied => "restart-denied",
            AuditEvent::SpawnFailed => "spawn-failed",
            AuditEvent::PersistFailed => "persist-failed",
            AuditEvent::VerificationFailed => "verification-failed",
            AuditEvent::Exited => "exited",
            AuditEvent::Stopped => "stopped",
            AuditEvent::ForceKilled => "force-killed",
        }
    }

    pub fn level(&self) -> LogLevel {
        match self {
            AuditEvent::Spawned
            | AuditEvent::RestartAllowed
            | AuditEvent::Stopped => LogLevel::Info,
            AuditEvent::RestartDenied
            | AuditEvent::VerificationFailed
            | AuditEvent::Exited
            | AuditEvent::ForceKilled => LogLevel::Warn,
            AuditEvent::SpawnFailed | AuditEvent::PersistFailed => LogLevel::Error,
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Logger {
    dir: PathBuf,
    rotation: RotationPolicy,
    /// Serializes rotate-then-append within this process.
    write_lock: Mutex<()>,
    dropped_count: AtomicU64,
}

impl Logger {
    pub fn new(dir: impl Into<PathBuf>, rotation: RotationPolicy) -> Self {
        Self {
            dir: dir.into(),
            rotation,
            write_lock: Mutex::new(()),
            dropped_count: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sink_path(&self, sink: &str) -> PathBuf {
        self.dir.join(format!("{}.log", sink))
    }

    /// Number of entries discarded because the sink could not be written.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Append one entry to `sink`. Failures are swallowed after one attempt.
    pub fn write(&self, sink: &str, level: LogLevel, message: &str) {
        let line = format!(
            "{} {:<5} {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message
        );
        let path = self.sink_path(sink);
        let _guard = self.write_lock.lock();
        if let Err(e) = append_line(&path, &line, self.rotation) {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Dropped log entry for sink '{}': {}", sink, e);
        }
    }

    /// Record a supervisor decision about `daemon` in its own sink, the
    /// aggregate sink, and the tracing output.
    pub fn audit(&self, daemon: &str, event: AuditEvent, message: &str) {
        let level = event.level();
        match level {
            LogLevel::Debug => tracing::debug!(daemon, event = event.as_str(), "{}", message),
            LogLevel::Info => tracing::info!(daemon, event = event.as_str(), "{}", message),
            LogLevel::Warn => tracing::warn!(daemon, event = event.as_str(), "{}", message),
            LogLevel::Error => tracing::error!(daemon, event = event.as_str(), "{}", message),
        }
        self.write(
            AGGREGATE_SINK,
            level,
            &format!("[{}] {}: {}", daemon, event, message),
        );
        self.write(daemon, level, &format!("[warden] {}: {}", event, message));
    }

    /// Rotate a daemon's sink once it has grown past the limit. Called before
    /// each spawn and on every health check, since a running daemon appends
    /// to its sink without going through [`Logger::write`]. Returns whether a
    /// rotation happened.
    pub fn rotate_if_needed(&self, sink: &str) -> bool {
        let path = self.sink_path(sink);
        let _guard = self.write_lock.lock();
        match rotate_if_needed(&path, 0, self.rotation) {
            Ok(rotated) => rotated,
            Err(e) => {
                tracing::warn!("Failed to rotate log '{}': {}", path.display(), e);
                false
            }
        }
    }

    /// Read the last `tail` lines of a sink. A missing sink reads as empty.
    pub async fn read_tail(&self, sink: &str, tail: usize) -> Result<Vec<String>> {
        let path = self.sink_path(sink);
        let lines = tokio::task::spawn_blocking(move || read_tail_blocking(&path, tail))
            .await
            .map_err(|e| std::io::Error::other(format!("log reader panicked: {}", e)))??;
        Ok(lines)
    }
}

fn read_tail_blocking(path: &Path, tail: usize) -> std::io::Result<Vec<String>> {
    use std::collections::VecDeque;
    use std::fs::File;
    use std::io::{BufRead, BufReader, Seek, SeekFrom};

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    if tail == 0 {
        return Ok(Vec::new());
    }

    // Estimate: assume ~200 bytes per line, read what we need
    let file_size = file.metadata()?.len();
    let start_pos = file_size.saturating_sub((tail as u64).saturating_mul(200));

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(start_pos))?;

    let mut buf = Vec::new();
    if start_pos > 0 {
        // Skip the partial first line
        reader.read_until(b'\n', &mut buf)?;
    }

    let mut lines = VecDeque::with_capacity(tail);
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        if lines.len() == tail {
            lines.pop_front();
        }
        lines.push_back(line);
    }
    Ok(lines.into())
}
