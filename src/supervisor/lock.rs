//! Advisory file locks in the state directory.
//!
//! `locks/<name>.lock` serializes every state transition for one daemon
//! across the monitor loop and operator commands, in this process or another.
//! `supervisor.lock` keeps a second supervisor from starting on the same
//! state directory. Locks are released when the handle is dropped.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Try to take the lock without waiting. `Ok(None)` means another holder has it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                // Record the owner for diagnostics
                let _ = file.set_len(0);
                let _ = writeln!(file, "{}", std::process::id());
                tracing::trace!("Acquired lock {}", path.display());
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if is_contended(&e) => {
                tracing::debug!("Lock {} is held elsewhere", path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait up to `timeout` for the lock.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!("lock {}", path.display())));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID written by whoever holds (or last held) the lock at `path`.
    pub fn owner(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.raw_os_error().is_some()
        && err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watcher.lock");

        let first = FileLock::try_acquire(&path).unwrap().expect("first lock");
        assert!(FileLock::try_acquire(&path).unwrap().is_none());
        assert_eq!(FileLock::owner(&path), Some(std::process::id()));

        drop(first);
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }

    #[tokio::test]
    async fn acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watcher.lock");
        let _held = FileLock::try_acquire(&path).unwrap().unwrap();

        let err = FileLock::acquire(&path, Duration::from_millis(120))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
