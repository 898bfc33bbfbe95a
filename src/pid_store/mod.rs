//! Durable record of which process currently runs each daemon.
//!
//! One JSON file per daemon under `pids/`, always replaced atomically. A
//! record alone never proves a daemon is alive: [`PidStore::check`] also
//! verifies the live process still looks like the command that was spawned.

mod inspect;

pub use inspect::{LiveProcess, ProcessInspector, SystemInspector};

use crate::error::{validate_pid, Error, Result};
use crate::launcher::CommandSignature;
use crate::state::write_atomically;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub name: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub command_signature: CommandSignature,
}

/// Outcome of a liveness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// The recorded process is running and matches its signature.
    Alive(ProcessRecord),
    /// No record exists; the daemon was never started or was stopped cleanly.
    NoRecord,
    /// The recorded PID no longer exists or is a zombie.
    Exited(ProcessRecord),
    /// The PID exists but belongs to a different program.
    SignatureMismatch {
        record: ProcessRecord,
        found: String,
    },
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Alive(_))
    }

    pub fn record(&self) -> Option<&ProcessRecord> {
        match self {
            Liveness::Alive(record)
            | Liveness::Exited(record)
            | Liveness::SignatureMismatch { record, .. } => Some(record),
            Liveness::NoRecord => None,
        }
    }
}

pub struct PidStore {
    dir: PathBuf,
    inspector: Arc<dyn ProcessInspector>,
}

impl PidStore {
    pub fn new(dir: impl Into<PathBuf>, inspector: Arc<dyn ProcessInspector>) -> Self {
        Self {
            dir: dir.into(),
            inspector,
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    pub fn inspector(&self) -> &Arc<dyn ProcessInspector> {
        &self.inspector
    }

    /// Durably record that `name` runs as `pid`. Readers see either the
    /// previous record or this one.
    pub fn persist(
        &self,
        name: &str,
        pid: u32,
        command_signature: &CommandSignature,
        started_at: DateTime<Utc>,
    ) -> Result<ProcessRecord> {
        validate_pid(pid, name)?;
        let record = ProcessRecord {
            name: name.to_string(),
            pid,
            started_at,
            command_signature: command_signature.clone(),
        };
        let contents = serde_json::to_vec_pretty(&record)?;
        write_atomically(&self.path_for(name), &contents).map_err(|e| Error::Persistence {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(record)
    }

    /// Read the record for `name`. Missing is `Ok(None)`; unreadable or
    /// malformed content is an error.
    pub fn load(&self, name: &str) -> Result<Option<ProcessRecord>> {
        read_record(&self.path_for(name))
    }

    /// All readable records, sorted by name. Malformed files are skipped.
    pub fn records(&self) -> Result<Vec<ProcessRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable PID record {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Determine whether `name`'s recorded process is still running.
    ///
    /// A malformed record reads as [`Liveness::NoRecord`].
    pub fn check(&self, name: &str) -> Liveness {
        match self.load(name) {
            Ok(Some(record)) => self.verify(record),
            Ok(None) => Liveness::NoRecord,
            Err(e) => {
                tracing::warn!("Treating PID record for '{}' as absent: {}", name, e);
                Liveness::NoRecord
            }
        }
    }

    /// Verify an already-loaded record against the live process table.
    pub fn verify(&self, record: ProcessRecord) -> Liveness {
        match self.inspector.inspect(record.pid) {
            None => Liveness::Exited(record),
            Some(live) if live.zombie => Liveness::Exited(record),
            Some(live) if live.matches(&record.command_signature) => Liveness::Alive(record),
            Some(live) => {
                let found = if live.cmd.is_empty() {
                    live.name
                } else {
                    live.cmd.join(" ")
                };
                Liveness::SignatureMismatch { record, found }
            }
        }
    }

    pub fn is_alive(&self, name: &str) -> bool {
        self.check(name).is_alive()
    }

    /// Remove the record for `name`. Removing a missing record is not an error.
    pub fn clear(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub(crate) fn read_record(path: &Path) -> Result<Option<ProcessRecord>> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|e| Error::Parse(format!("Malformed PID record {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct TableInspector {
        table: Mutex<HashMap<u32, LiveProcess>>,
    }

    impl TableInspector {
        fn insert(&self, pid: u32, name: &str, cmd: &[&str]) {
            self.table.lock().insert(
                pid,
                LiveProcess {
                    pid,
                    name: name.to_string(),
                    exe: None,
                    cmd: cmd.iter().map(|s| s.to_string()).collect(),
                    zombie: false,
                },
            );
        }
    }

    impl ProcessInspector for TableInspector {
        fn inspect(&self, pid: u32) -> Option<LiveProcess> {
            self.table.lock().get(&pid).cloned()
        }
    }

    fn store() -> (tempfile::TempDir, Arc<TableInspector>, PidStore) {
        let dir = tempfile::tempdir().unwrap();
        let inspector = Arc::new(TableInspector::default());
        let store = PidStore::new(dir.path(), inspector.clone());
        (dir, inspector, store)
    }

    #[test]
    fn persist_load_clear() {
        let (_dir, inspector, store) = store();
        let sig = CommandSignature::new("sleep", ["300"]);
        inspector.insert(4242, "sleep", &["sleep", "300"]);

        let record = store.persist("watcher", 4242, &sig, Utc::now()).unwrap();
        assert_eq!(store.load("watcher").unwrap(), Some(record.clone()));
        assert_eq!(store.check("watcher"), Liveness::Alive(record));

        store.clear("watcher").unwrap();
        store.clear("watcher").unwrap();
        assert_eq!(store.check("watcher"), Liveness::NoRecord);
    }

    #[test]
    fn dead_pid_is_exited() {
        let (_dir, _inspector, store) = store();
        let sig = CommandSignature::new("sleep", ["300"]);
        store.persist("watcher", 4242, &sig, Utc::now()).unwrap();

        assert!(matches!(store.check("watcher"), Liveness::Exited(r) if r.pid == 4242));
        assert!(!store.is_alive("watcher"));
    }

    #[test]
    fn reused_pid_is_not_alive() {
        let (_dir, inspector, store) = store();
        let sig = CommandSignature::new("workerA", Vec::<String>::new());
        store.persist("A", 1234, &sig, Utc::now()).unwrap();
        inspector.insert(1234, "unrelated-process", &["unrelated-process"]);

        assert!(!store.is_alive("A"));
        match store.check("A") {
            Liveness::SignatureMismatch { record, found } => {
                assert_eq!(record.pid, 1234);
                assert_eq!(found, "unrelated-process");
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn zombie_is_exited() {
        let (_dir, inspector, store) = store();
        let sig = CommandSignature::new("sleep", ["300"]);
        store.persist("watcher", 4242, &sig, Utc::now()).unwrap();
        inspector.insert(4242, "sleep", &["sleep", "300"]);
        inspector.table.lock().get_mut(&4242).unwrap().zombie = true;

        assert!(matches!(store.check("watcher"), Liveness::Exited(_)));
    }

    #[test]
    fn malformed_record_reads_as_absent() {
        let (_dir, _inspector, store) = store();
        fs::write(store.path_for("watcher"), "{\"name\":\"watc").unwrap();

        assert!(store.load("watcher").is_err());
        assert_eq!(store.check("watcher"), Liveness::NoRecord);
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn persist_rejects_invalid_pids() {
        let (_dir, _inspector, store) = store();
        let sig = CommandSignature::new("sleep", ["300"]);
        assert!(store.persist("watcher", 0, &sig, Utc::now()).is_err());
        assert_eq!(store.load("watcher").unwrap(), None);
    }

    #[test]
    fn records_lists_every_daemon() {
        let (_dir, _inspector, store) = store();
        let sig = CommandSignature::new("sleep", ["300"]);
        store.persist("b", 20, &sig, Utc::now()).unwrap();
        store.persist("a", 10, &sig, Utc::now()).unwrap();

        let names: Vec<_> = store.records().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
