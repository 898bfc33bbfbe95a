//! Single running supervisor per state directory.

use super::FileLock;
use crate::error::{Error, Result};
use crate::launcher::CommandSignature;
use crate::pid_store::{read_record, ProcessInspector, ProcessRecord};
use crate::state::{write_atomically, StateLayout};
use chrono::{DateTime, Utc};

/// Name stored in the supervisor's own process record.
pub const SUPERVISOR_RECORD_NAME: &str = "warden";

/// Held for as long as this process supervises the state directory.
#[derive(Debug)]
pub struct InstanceGuard {
    _lock: FileLock,
    record: ProcessRecord,
    record_path: std::path::PathBuf,
}

impl InstanceGuard {
    /// Take `supervisor.lock` and publish this process in `supervisor.json`.
    pub fn acquire(layout: &StateLayout, started_at: DateTime<Utc>) -> Result<Self> {
        let lock_path = layout.supervisor_lock();
        let lock = match FileLock::try_acquire(&lock_path)? {
            Some(lock) => lock,
            None => {
                return Err(Error::AlreadyRunning {
                    pid: FileLock::owner(&lock_path),
                })
            }
        };

        let record = ProcessRecord {
            name: SUPERVISOR_RECORD_NAME.to_string(),
            pid: std::process::id(),
            started_at,
            command_signature: current_signature(),
        };
        let record_path = layout.supervisor_record();
        write_atomically(&record_path, &serde_json::to_vec_pretty(&record)?)?;
        tracing::debug!("Supervisor instance recorded at {}", record_path.display());

        Ok(Self {
            _lock: lock,
            record,
            record_path,
        })
    }

    pub fn record(&self) -> &ProcessRecord {
        &self.record
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.record_path);
    }
}

/// The supervisor currently running on `layout`, if its record is present
/// and still matches a live process.
pub fn running_supervisor(
    layout: &StateLayout,
    inspector: &dyn ProcessInspector,
) -> Option<ProcessRecord> {
    let record = read_record(&layout.supervisor_record()).ok()??;
    let live = inspector.inspect(record.pid)?;
    if live.zombie || !live.matches(&record.command_signature) {
        return None;
    }
    Some(record)
}

fn current_signature() -> CommandSignature {
    let program = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| SUPERVISOR_RECORD_NAME.to_string());
    CommandSignature::new(program, std::env::args().skip(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_instance_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.ensure().unwrap();

        let guard = InstanceGuard::acquire(&layout, Utc::now()).unwrap();
        assert!(layout.supervisor_record().exists());
        assert_eq!(guard.record().pid, std::process::id());

        let err = InstanceGuard::acquire(&layout, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            Error::AlreadyRunning { pid: Some(pid) } if pid == std::process::id()
        ));

        drop(guard);
        assert!(!layout.supervisor_record().exists());
        assert!(InstanceGuard::acquire(&layout, Utc::now()).is_ok());
    }
}
