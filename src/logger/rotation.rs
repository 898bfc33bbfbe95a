//! Size-based rotation of append-only log files.
//!
//! `app.log.1` is renamed to `app.log.2` and so on, the file past the
//! retention count is deleted, then the live `app.log` is copied to
//! `app.log.1` and truncated in place. The live file keeps its inode, so a
//! daemon whose stdout is an O_APPEND descriptor on it keeps writing into the
//! bounded file instead of following a renamed backup.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_BACKUPS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub backups: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            backups: DEFAULT_BACKUPS,
        }
    }
}

impl RotationPolicy {
    pub fn from_config(config: &crate::config::LogConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_bytes: config.max_bytes.unwrap_or(defaults.max_bytes),
            backups: config.backups.unwrap_or(defaults.backups),
        }
    }
}

pub fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// Shift backups up by one, copy the live file to `.1` and truncate it.
pub fn rotate(path: &Path, backups: usize) -> io::Result<()> {
    if backups > 0 {
        match fs::remove_file(backup_path(path, backups)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        for index in (1..backups).rev() {
            let from = backup_path(path, index);
            if from.exists() {
                fs::rename(&from, backup_path(path, index + 1))?;
            }
        }
        match fs::copy(path, backup_path(path, 1)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
            Ok(_) => {}
        }
    }
    // Lines a daemon writes between the copy and the truncate are lost.
    match OpenOptions::new().write(true).open(path) {
        Ok(file) => file.set_len(0),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Rotate `path` if appending `incoming` bytes would push it past the limit.
/// Returns whether a rotation happened.
pub fn rotate_if_needed(path: &Path, incoming: u64, policy: RotationPolicy) -> io::Result<bool> {
    let current = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if current == 0 || current.saturating_add(incoming) <= policy.max_bytes {
        return Ok(false);
    }
    rotate(path, policy.backups)?;
    Ok(true)
}

pub fn append_line(path: &Path, line: &str, policy: RotationPolicy) -> io::Result<()> {
    rotate_if_needed(path, line.len() as u64 + 1, policy)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")
}
