use super::{FileLock, Supervisor, OPERATOR_LOCK_TIMEOUT};
use crate::config::DaemonSpec;
use crate::error::{Error, Result};
use crate::logger::AuditEvent;
use crate::monitor::{DaemonState, HealthCheckResult};
use crate::pid_store::{Liveness, ProcessRecord};
use crate::policy::{AttemptKind, Decision, EventOutcome, RestartEvent};
use crate::state::write_atomically;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Interval between liveness polls while waiting for a process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for the kernel to reap a force-killed process.
const FORCE_KILL_WAIT: Duration = Duration::from_secs(2);

/// Result of one monitor evaluation of a daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub state: DaemonState,
    /// `None` when the check was skipped or inconclusive.
    pub check: Option<HealthCheckResult>,
    pub decision: Option<Decision>,
    pub spawned_pid: Option<u32>,
}

impl Evaluation {
    fn unchanged(state: DaemonState) -> Self {
        Self {
            state,
            check: None,
            decision: None,
            spawned_pid: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Exited within the grace period.
    Stopped,
    /// Ignored the termination request and was killed.
    ForceKilled,
    NotRunning,
    /// Could not be examined (busy lock or inconclusive check).
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stopped: Vec<String>,
    pub force_killed: Vec<String>,
    pub not_running: Vec<String>,
    pub skipped: Vec<String>,
}

impl ShutdownReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            stopped: Vec::new(),
            force_killed: Vec::new(),
            not_running: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn record(&mut self, name: String, outcome: StopOutcome) {
        match outcome {
            StopOutcome::Stopped => self.stopped.push(name),
            StopOutcome::ForceKilled => self.force_killed.push(name),
            StopOutcome::NotRunning => self.not_running.push(name),
            StopOutcome::Skipped => self.skipped.push(name),
        }
    }

    /// Every daemon exited on request or was already down.
    pub fn is_clean(&self) -> bool {
        self.force_killed.is_empty() && self.skipped.is_empty()
    }

    fn mentions(&self, name: &str) -> bool {
        [&self.stopped, &self.force_killed, &self.not_running, &self.skipped]
            .iter()
            .any(|names| names.iter().any(|n| n == name))
    }

    /// Fold in a later sweep. Daemons already reported keep their outcome.
    pub fn merge(&mut self, later: ShutdownReport) {
        self.finished_at = self.finished_at.max(later.finished_at);
        let outcomes = [
            (later.stopped, StopOutcome::Stopped),
            (later.force_killed, StopOutcome::ForceKilled),
            (later.not_running, StopOutcome::NotRunning),
            (later.skipped, StopOutcome::Skipped),
        ];
        for (names, outcome) in outcomes {
            for name in names {
                if !self.mentions(&name) {
                    self.record(name, outcome);
                }
            }
        }
    }
}

impl Supervisor {
    /// Check one daemon and, if it is down, start or restart it when the
    /// restart policy allows.
    ///
    /// Skips the daemon (returning `previous` unchanged) when another
    /// operation holds its lock or the liveness check is inconclusive.
    pub async fn evaluate(&self, name: &str, previous: DaemonState) -> Evaluation {
        let Some(spec) = self.registry.get(name) else {
            tracing::warn!("Skipping unknown daemon '{}'", name);
            return Evaluation::unchanged(previous);
        };

        let _lock = match FileLock::try_acquire(&self.layout.lock_file(name)) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                tracing::debug!("Daemon '{}' is busy, skipping this check", name);
                return Evaluation::unchanged(previous);
            }
            Err(e) => {
                tracing::warn!("Failed to lock daemon '{}': {}", name, e);
                return Evaluation::unchanged(previous);
            }
        };

        // A running daemon writes its sink directly, so bound it on every check.
        self.logger.rotate_if_needed(name);

        let Some(liveness) = self.check_liveness(name).await else {
            return Evaluation::unchanged(previous);
        };
        let check = HealthCheckResult {
            daemon_name: name.to_string(),
            alive: liveness.is_alive(),
            checked_at: self.clock.now(),
        };

        let (kind, reason) = match &liveness {
            Liveness::Alive(_) => {
                self.set_state(name, DaemonState::Running);
                return Evaluation {
                    state: DaemonState::Running,
                    check: Some(check),
                    decision: None,
                    spawned_pid: None,
                };
            }
            Liveness::NoRecord => (AttemptKind::Start, "initial start"),
            Liveness::Exited(record) => {
                if previous == DaemonState::Running {
                    self.logger.audit(
                        name,
                        AuditEvent::Exited,
                        &format!("PID {} is no longer running", record.pid),
                    );
                }
                (AttemptKind::Restart, "process exited")
            }
            Liveness::SignatureMismatch { record, found } => {
                self.logger.audit(
                    name,
                    AuditEvent::VerificationFailed,
                    &format!(
                        "PID {} now belongs to '{}', treating daemon as dead",
                        record.pid, found
                    ),
                );
                (AttemptKind::Restart, "PID reused by another process")
            }
        };

        let mut evaluation = self.attempt_launch(spec, kind, reason);
        evaluation.check = Some(check);
        self.set_state(name, evaluation.state);
        evaluation
    }

    fn attempt_launch(&self, spec: &DaemonSpec, kind: AttemptKind, reason: &str) -> Evaluation {
        let name = spec.name.as_str();
        if self.is_shutting_down() {
            tracing::debug!("Not launching '{}': shutdown in progress", name);
            return Evaluation::unchanged(DaemonState::DeadPendingDecision);
        }

        let now = self.clock.now();
        let decision = match self.decide(name, kind, now) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!("Cannot read restart history for '{}': {}", name, e);
                return Evaluation::unchanged(DaemonState::DeadPendingDecision);
            }
        };
        if let Decision::Deny(_) = decision {
            return Evaluation {
                state: DaemonState::DeniedWaiting,
                check: None,
                decision: Some(decision),
                spawned_pid: None,
            };
        }

        self.set_state(name, DaemonState::Restarting);
        match self.launch(spec, kind, reason, now) {
            Ok(record) => Evaluation {
                state: DaemonState::Running,
                check: None,
                decision: Some(decision),
                spawned_pid: Some(record.pid),
            },
            Err(_) => Evaluation {
                state: DaemonState::DeadPendingDecision,
                check: None,
                decision: Some(decision),
                spawned_pid: None,
            },
        }
    }

    /// Consult the restart policy and log the decision. Denials are recorded
    /// in the history; allowed attempts are recorded by [`Supervisor::launch`].
    fn decide(&self, name: &str, kind: AttemptKind, now: DateTime<Utc>) -> Result<Decision> {
        let history = match self.history.load(name) {
            Ok(history) => history,
            Err(Error::Parse(msg)) => {
                tracing::warn!("{}; deciding as if it were empty", msg);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let decision = self.policy.may_restart(name, &history, now);
        match decision {
            Decision::Allow => {
                let what = match kind {
                    AttemptKind::Start => "start",
                    AttemptKind::Restart => "restart",
                    AttemptKind::Manual => "operator restart",
                };
                self.logger
                    .audit(name, AuditEvent::RestartAllowed, &format!("{} allowed", what));
            }
            Decision::Deny(reason) => {
                self.logger
                    .audit(name, AuditEvent::RestartDenied, &reason.detail());
                self.record_event(name, RestartEvent::denied(now, kind, &reason), now);
            }
        }
        Ok(decision)
    }

    /// Spawn `spec` and record its PID. If the PID cannot be recorded the
    /// new process is killed, so no untracked instance is left running.
    fn launch(
        &self,
        spec: &DaemonSpec,
        kind: AttemptKind,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ProcessRecord> {
        let name = spec.name.as_str();
        self.logger.rotate_if_needed(name);

        let handle = match self.launcher.spawn(spec) {
            Ok(handle) => handle,
            Err(e) => {
                self.logger.audit(name, AuditEvent::SpawnFailed, &e.to_string());
                self.record_event(
                    name,
                    RestartEvent::failed(now, kind, EventOutcome::SpawnFailed, e.to_string()),
                    now,
                );
                return Err(e.into());
            }
        };

        match self
            .pid_store
            .persist(name, handle.pid, &handle.signature, now)
        {
            Ok(record) => {
                self.logger.audit(
                    name,
                    AuditEvent::Spawned,
                    &format!("PID {} ({})", handle.pid, reason),
                );
                self.record_event(
                    name,
                    RestartEvent::spawned(now, kind, reason, handle.pid),
                    now,
                );
                Ok(record)
            }
            Err(e) => {
                self.logger.audit(
                    name,
                    AuditEvent::PersistFailed,
                    &format!("PID {} could not be recorded, killing it: {}", handle.pid, e),
                );
                if let Err(kill_err) = self.launcher.force_kill(handle.pid) {
                    tracing::error!(
                        "Failed to kill untracked PID {} for '{}': {}",
                        handle.pid,
                        name,
                        kill_err
                    );
                }
                self.record_event(
                    name,
                    RestartEvent::failed(now, kind, EventOutcome::PersistFailed, e.to_string()),
                    now,
                );
                Err(e)
            }
        }
    }

    fn record_event(&self, name: &str, event: RestartEvent, now: DateTime<Utc>) {
        if let Err(e) = self.history.append(name, event, now) {
            tracing::error!("Failed to record restart history for '{}': {}", name, e);
        }
    }

    /// Run the PID store check off the async runtime, bounded by the liveness
    /// timeout. `None` means inconclusive.
    async fn check_liveness(&self, name: &str) -> Option<Liveness> {
        let store = Arc::clone(&self.pid_store);
        let owned = name.to_string();
        let check = tokio::task::spawn_blocking(move || store.check(&owned));
        match tokio::time::timeout(self.liveness_timeout, check).await {
            Ok(Ok(liveness)) => Some(liveness),
            Ok(Err(e)) => {
                tracing::warn!("Liveness check for '{}' failed: {}", name, e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "Liveness check for '{}' timed out after {:?}, keeping previous state",
                    name,
                    self.liveness_timeout
                );
                None
            }
        }
    }

    /// Operator-requested restart: stop the daemon if it runs, then start it
    /// again. Subject to the same restart policy as automatic restarts. Fails
    /// with `StillRunning` if the old process survives a forced kill.
    pub async fn restart(&self, name: &str) -> Result<ProcessRecord> {
        let spec = self.registry.require(name)?;
        let _lock = FileLock::acquire(&self.layout.lock_file(name), OPERATOR_LOCK_TIMEOUT)
            .await
            .map_err(|e| match e {
                Error::Timeout(_) => Error::Busy(name.to_string()),
                other => other,
            })?;

        let now = self.clock.now();
        if let Decision::Deny(reason) = self.decide(name, AttemptKind::Manual, now)? {
            return Err(Error::RestartDenied {
                name: name.to_string(),
                reason: reason.detail(),
            });
        }

        let liveness = self
            .check_liveness(name)
            .await
            .ok_or_else(|| Error::Timeout(format!("liveness check of '{}'", name)))?;
        if let Liveness::Alive(record) = liveness {
            let outcome = self
                .stop_record(name, &record, self.grace_period_for(spec))
                .await;
            // A survivor keeps its record; launching now would leave it untracked.
            if outcome == StopOutcome::ForceKilled
                && self.pid_store.verify(record.clone()).is_alive()
            {
                return Err(Error::StillRunning {
                    name: name.to_string(),
                    pid: record.pid,
                });
            }
        }

        let record = self.launch(spec, AttemptKind::Manual, "operator request", now)?;
        self.set_state(name, DaemonState::Running);
        Ok(record)
    }

    /// Stop one daemon: termination request, grace period, then forced kill.
    /// A PID that fails signature verification is never signalled.
    pub async fn stop_daemon(&self, name: &str) -> Result<StopOutcome> {
        let spec = self.registry.require(name)?;
        let _lock = FileLock::acquire(&self.layout.lock_file(name), OPERATOR_LOCK_TIMEOUT)
            .await
            .map_err(|e| match e {
                Error::Timeout(_) => Error::Busy(name.to_string()),
                other => other,
            })?;

        let outcome = match self.check_liveness(name).await {
            None => StopOutcome::Skipped,
            Some(Liveness::Alive(record)) => {
                self.stop_record(name, &record, self.grace_period_for(spec))
                    .await
            }
            Some(Liveness::NoRecord) => StopOutcome::NotRunning,
            Some(Liveness::Exited(_)) => {
                self.pid_store.clear(name)?;
                StopOutcome::NotRunning
            }
            Some(Liveness::SignatureMismatch { record, found }) => {
                self.logger.audit(
                    name,
                    AuditEvent::VerificationFailed,
                    &format!(
                        "PID {} now belongs to '{}', not signalling it",
                        record.pid, found
                    ),
                );
                self.pid_store.clear(name)?;
                StopOutcome::NotRunning
            }
        };
        Ok(outcome)
    }

    async fn stop_record(&self, name: &str, record: &ProcessRecord, grace: Duration) -> StopOutcome {
        if let Err(e) = self.launcher.terminate(record.pid) {
            tracing::warn!("Failed to send termination request to '{}': {}", name, e);
        }

        if self.wait_for_exit(record, grace).await {
            self.clear_record(name);
            self.logger.audit(
                name,
                AuditEvent::Stopped,
                &format!("PID {} exited", record.pid),
            );
            return StopOutcome::Stopped;
        }

        tracing::warn!(
            "Daemon '{}' did not exit after termination request (grace period: {:?}), force killing",
            name,
            grace
        );
        if let Err(e) = self.launcher.force_kill(record.pid) {
            tracing::error!("Failed to force kill '{}': {}", name, e);
        }
        let gone = self.wait_for_exit(record, FORCE_KILL_WAIT).await;
        if gone {
            self.clear_record(name);
        }
        self.logger.audit(
            name,
            AuditEvent::ForceKilled,
            &format!(
                "PID {} ignored the termination request for {:?}{}",
                record.pid,
                grace,
                if gone { "" } else { " and is still running" }
            ),
        );
        StopOutcome::ForceKilled
    }

    /// Poll until the recorded process is gone or `timeout` elapses.
    async fn wait_for_exit(&self, record: &ProcessRecord, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.pid_store.verify(record.clone()).is_alive() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    fn clear_record(&self, name: &str) {
        if let Err(e) = self.pid_store.clear(name) {
            tracing::warn!("Failed to clear PID record for '{}': {}", name, e);
        }
    }

    /// Stop scheduling, then stop every daemon concurrently and write the
    /// report to the state directory.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.begin_shutdown();
        let mut report = ShutdownReport::new(self.clock.now());

        let outcomes = join_all(self.registry.iter().map(|spec| async move {
            let outcome = match self.stop_daemon(&spec.name).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!("Failed to stop '{}': {}", spec.name, e);
                    StopOutcome::Skipped
                }
            };
            (spec.name.clone(), outcome)
        }))
        .await;

        for (name, outcome) in outcomes {
            report.record(name, outcome);
        }
        report.finished_at = self.clock.now();

        match serde_json::to_vec_pretty(&report) {
            Ok(contents) => {
                if let Err(e) = write_atomically(&self.layout.shutdown_report(), &contents) {
                    tracing::warn!("Failed to write shutdown report: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize shutdown report: {}", e),
        }

        tracing::info!(
            "Shutdown complete: {} stopped, {} force-killed, {} not running, {} skipped",
            report.stopped.len(),
            report.force_killed.len(),
            report.not_running.len(),
            report.skipped.len()
        );
        report
    }

    /// Read the report written by the most recent shutdown, if any.
    pub fn last_shutdown_report(&self) -> Result<Option<ShutdownReport>> {
        match std::fs::read(self.layout.shutdown_report()) {
            Ok(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_cleanliness() {
        let mut report = ShutdownReport::new(Utc::now());
        report.record("a".to_string(), StopOutcome::Stopped);
        report.record("b".to_string(), StopOutcome::NotRunning);
        assert!(report.is_clean());

        report.record("c".to_string(), StopOutcome::ForceKilled);
        assert!(!report.is_clean());
    }

    #[test]
    fn merge_keeps_first_outcome() {
        let now = Utc::now();
        let mut report = ShutdownReport::new(now);
        report.record("a".to_string(), StopOutcome::Stopped);

        let mut sweep = ShutdownReport::new(now + chrono::Duration::seconds(3));
        sweep.record("a".to_string(), StopOutcome::NotRunning);
        sweep.record("b".to_string(), StopOutcome::ForceKilled);

        report.merge(sweep);
        assert_eq!(report.stopped, vec!["a"]);
        assert!(report.not_running.is_empty());
        assert_eq!(report.force_killed, vec!["b"]);
        assert_eq!(report.finished_at, now + chrono::Duration::seconds(3));
    }
}
