//! Persisted restart history, one JSON array per daemon under `history/`.

use super::DenyReason;
use crate::error::{Error, Result};
use crate::state::write_atomically;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// How long events are kept. Must exceed every configured rate window.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    /// First launch, with no prior PID record.
    Start,
    /// Automatic relaunch after the recorded process died.
    Restart,
    /// Operator-requested restart.
    Manual,
}

impl AttemptKind {
    pub fn counts_as_restart(&self) -> bool {
        !matches!(self, AttemptKind::Start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Spawned,
    SpawnFailed,
    /// Spawned, but the PID could not be recorded so the process was killed.
    PersistFailed,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: AttemptKind,
    pub outcome: EventOutcome,
    pub reason: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resulting_pid: Option<u32>,
}

impl RestartEvent {
    pub fn spawned(timestamp: DateTime<Utc>, kind: AttemptKind, reason: &str, pid: u32) -> Self {
        Self {
            timestamp,
            kind,
            outcome: EventOutcome::Spawned,
            reason: reason.to_string(),
            success: true,
            resulting_pid: Some(pid),
        }
    }

    pub fn failed(
        timestamp: DateTime<Utc>,
        kind: AttemptKind,
        outcome: EventOutcome,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            kind,
            outcome,
            reason: reason.into(),
            success: false,
            resulting_pid: None,
        }
    }

    pub fn denied(timestamp: DateTime<Utc>, kind: AttemptKind, deny: &DenyReason) -> Self {
        Self::failed(timestamp, kind, EventOutcome::Denied, deny.as_str())
    }

    /// Whether the launcher was actually invoked for this event.
    pub fn reached_launcher(&self) -> bool {
        !matches!(self.outcome, EventOutcome::Denied)
    }

    /// Whether this event consumes the daemon's restart budget. Failed
    /// launches always count, so a missing executable with no PID record
    /// is still rate limited.
    pub fn counts_toward_limit(&self) -> bool {
        self.reached_launcher() && (self.kind.counts_as_restart() || !self.success)
    }

    /// A restart that produced a running process.
    pub fn is_successful_restart(&self) -> bool {
        self.kind.counts_as_restart() && self.success
    }
}

pub struct HistoryStore {
    dir: PathBuf,
    retention: chrono::Duration,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_retention(dir, DEFAULT_RETENTION)
    }

    pub fn with_retention(dir: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            dir: dir.into(),
            retention: chrono::Duration::seconds(retention.as_secs() as i64),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Events for `name`, oldest first. A missing file is an empty history.
    pub fn load(&self, name: &str) -> Result<Vec<RestartEvent>> {
        let path = self.path_for(name);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&contents).map_err(|e| {
            Error::Parse(format!("Malformed restart history {}: {}", path.display(), e))
        })
    }

    /// Append `event`, dropping entries older than the retention period
    /// relative to `now`. Returns the history as written.
    pub fn append(
        &self,
        name: &str,
        event: RestartEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<RestartEvent>> {
        let mut events = match self.load(name) {
            Ok(events) => events,
            Err(Error::Parse(msg)) => {
                tracing::warn!("{}; starting a fresh history", msg);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let cutoff = now - self.retention;
        events.retain(|e| e.timestamp >= cutoff);
        events.push(event);

        let contents = serde_json::to_vec_pretty(&events)?;
        write_atomically(&self.path_for(name), &contents).map_err(|e| Error::Persistence {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_prunes_old_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let start = Utc::now();

        store
            .append(
                "watcher",
                RestartEvent::spawned(start, AttemptKind::Start, "initial start", 10),
                start,
            )
            .unwrap();
        let later = start + chrono::Duration::hours(25);
        let events = store
            .append(
                "watcher",
                RestartEvent::spawned(later, AttemptKind::Restart, "process exited", 11),
                later,
            )
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].resulting_pid, Some(11));
        assert_eq!(store.load("watcher").unwrap(), events);
    }

    #[test]
    fn missing_history_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        assert!(store.load("nobody").unwrap().is_empty());
    }

    #[test]
    fn budget_accounting() {
        let now = Utc::now();
        let start = RestartEvent::spawned(now, AttemptKind::Start, "initial start", 1);
        assert!(!start.counts_toward_limit());
        assert!(!start.is_successful_restart());

        let failed = RestartEvent::failed(now, AttemptKind::Restart, EventOutcome::SpawnFailed, "ENOENT");
        assert!(failed.counts_toward_limit());
        assert!(!failed.is_successful_restart());

        let failed_start =
            RestartEvent::failed(now, AttemptKind::Start, EventOutcome::SpawnFailed, "ENOENT");
        assert!(failed_start.counts_toward_limit());

        let denied = RestartEvent::denied(now, AttemptKind::Restart, &DenyReason::Cooldown {
            remaining: Duration::from_secs(5),
        });
        assert!(!denied.reached_launcher());
        assert_eq!(denied.reason, "cooldown");
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let event = RestartEvent::failed(
            Utc::now(),
            AttemptKind::Manual,
            EventOutcome::PersistFailed,
            "disk full",
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"manual\""));
        assert!(json.contains("\"outcome\":\"persist_failed\""));
        assert!(!json.contains("resulting_pid"));
    }
}
