use super::Supervisor;
use crate::config::DaemonSpec;
use crate::error::Result;
use crate::monitor::DaemonState;
use crate::pid_store::Liveness;
use crate::policy::{successful_restarts_within, EventOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Trailing window for the `restarts_in_last_hour` counter.
const RESTART_COUNT_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Condition of a daemon as seen from the state directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Running,
    /// Has a record but the process is gone.
    Dead,
    /// The last launch attempt was refused by the restart policy.
    Denied,
    Stopped,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusState::Running => "running",
            StatusState::Dead => "dead",
            StatusState::Denied => "denied",
            StatusState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub name: String,
    pub alive: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restarts_in_last_hour: u32,
    pub state: StatusState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_denial: Option<String>,
    /// Monitor state, only known inside the supervising process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_state: Option<DaemonState>,
}

impl Supervisor {
    /// Report every daemon, or only `name`. Reads the state directory and
    /// inspects processes; never spawns, signals or writes anything.
    pub fn status(&self, name: Option<&str>) -> Result<Vec<DaemonStatus>> {
        let now = self.clock.now();
        match name {
            Some(name) => {
                let spec = self.registry.require(name)?;
                Ok(vec![self.daemon_status(spec, now)])
            }
            None => Ok(self
                .registry
                .iter()
                .map(|spec| self.daemon_status(spec, now))
                .collect()),
        }
    }

    fn daemon_status(&self, spec: &DaemonSpec, now: DateTime<Utc>) -> DaemonStatus {
        let name = spec.name.as_str();
        let history = self.history.load(name).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable restart history for '{}': {}", name, e);
            Vec::new()
        });
        let liveness = self.pid_store.check(name);

        let last_denial = history
            .last()
            .filter(|e| e.outcome == EventOutcome::Denied)
            .map(|e| e.reason.clone());

        let state = match (&liveness, &last_denial) {
            (Liveness::Alive(_), _) => StatusState::Running,
            (_, Some(_)) => StatusState::Denied,
            (Liveness::NoRecord, None) => StatusState::Stopped,
            _ => StatusState::Dead,
        };
        let running = match &liveness {
            Liveness::Alive(record) => Some(record),
            _ => None,
        };

        DaemonStatus {
            name: name.to_string(),
            alive: running.is_some(),
            pid: running.map(|r| r.pid),
            started_at: running.map(|r| r.started_at),
            restarts_in_last_hour: successful_restarts_within(&history, now, RESTART_COUNT_WINDOW),
            state,
            last_denial,
            monitor_state: self.current_state(name),
        }
    }
}
