//! On-disk layout of the state directory and the atomic write primitive
//! every persisted record goes through.
//!
//! ```text
//! <state_dir>/
//!   pids/<name>.json       ProcessRecord
//!   history/<name>.json    Vec<RestartEvent>
//!   locks/<name>.lock      per-daemon operation lock
//!   logs/<name>.log[.N]    daemon output, rotated
//!   logs/supervisor.log    aggregate decision log
//!   supervisor.lock        single-instance lock
//!   supervisor.json        running supervisor's own record
//!   shutdown.json          last ShutdownReport
//! ```

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sink name of the aggregate decision log.
pub const AGGREGATE_SINK: &str = "supervisor";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create every directory in the layout.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.pids_dir(),
            self.history_dir(),
            self.locks_dir(),
            self.logs_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| {
                Error::Config(format!(
                    "Failed to create state directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.root.join("pids")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join("history")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn lock_file(&self, name: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", name))
    }

    pub fn supervisor_lock(&self) -> PathBuf {
        self.root.join("supervisor.lock")
    }

    pub fn supervisor_record(&self) -> PathBuf {
        self.root.join("supervisor.json")
    }

    pub fn shutdown_report(&self) -> PathBuf {
        self.root.join("shutdown.json")
    }
}

/// Replace `path` with `contents` so readers see either the old file or the
/// new one, never a partial write.
pub fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    write_atomically_with(path, |file| file.write_all(contents))
}

/// Like [`write_atomically`], with the body produced by `write`.
///
/// If `write` fails, the temporary file is removed and `path` is untouched.
pub fn write_atomically_with<F>(path: &Path, write: F) -> std::io::Result<()>
where
    F: FnOnce(&mut fs::File) -> std::io::Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    write(temp.as_file_mut())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn layout_paths() {
        let layout = StateLayout::new("/tmp/w");
        assert_eq!(layout.lock_file("api"), PathBuf::from("/tmp/w/locks/api.lock"));
        assert_eq!(layout.supervisor_record(), PathBuf::from("/tmp/w/supervisor.json"));
    }

    #[test]
    fn ensure_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path().join("state"));
        layout.ensure().unwrap();
        assert!(layout.pids_dir().is_dir());
        assert!(layout.history_dir().is_dir());
        assert!(layout.locks_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
    }

    #[test]
    fn failed_write_leaves_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        write_atomically(&path, b"{\"pid\":1}").unwrap();

        let result = write_atomically_with(&path, |file| {
            file.write_all(b"{\"pi")?;
            Err(io::Error::other("disk full"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"pid\":1}");
        // Temp file was cleaned up
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
