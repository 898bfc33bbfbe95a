//! Scheduling loop that health-checks every daemon on its own interval.
//!
//! Each daemon carries a small state machine:
//!
//! ```text
//!                 alive                      spawn ok
//!   DeadPendingDecision ──────▶ Running ◀──────────── Restarting
//!          │  ▲                    │                       ▲
//!   denied │  │ next tick     dead │                 allow │
//!          ▼  │                    ▼                       │
//!    DeniedWaiting          DeadPendingDecision ───────────┘
//! ```
//!
//! Every daemon starts in `DeadPendingDecision` and is checked on the first
//! tick. Due daemons are evaluated concurrently; a slow check for one daemon
//! does not delay the others beyond the tick it shares with them.

use crate::supervisor::Supervisor;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Upper bound of the random delay added before each tick.
const MAX_TICK_JITTER_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Running,
    DeadPendingDecision,
    Restarting,
    DeniedWaiting,
}

impl DaemonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonState::Running => "running",
            DaemonState::DeadPendingDecision => "dead-pending-decision",
            DaemonState::Restarting => "restarting",
            DaemonState::DeniedWaiting => "denied-waiting",
        }
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of one liveness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub daemon_name: String,
    pub alive: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Slot {
    name: String,
    interval: Duration,
    state: DaemonState,
    next_due: Instant,
}

pub struct HealthMonitor {
    supervisor: Arc<Supervisor>,
    slots: Vec<Slot>,
}

impl HealthMonitor {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        let now = Instant::now();
        let slots = supervisor
            .registry()
            .iter()
            .map(|spec| Slot {
                name: spec.name.clone(),
                interval: spec.get_health_check_interval(),
                state: DaemonState::DeadPendingDecision,
                next_due: now,
            })
            .collect();
        Self { supervisor, slots }
    }

    pub fn state(&self, name: &str) -> Option<DaemonState> {
        self.slots.iter().find(|s| s.name == name).map(|s| s.state)
    }

    /// Earliest time any daemon is due, or `None` with nothing to supervise.
    pub fn next_due(&self) -> Option<Instant> {
        self.slots.iter().map(|s| s.next_due).min()
    }

    /// Evaluate every daemon due at `now` and reschedule it one interval later.
    ///
    /// Returns the liveness checks that completed; a daemon whose check was
    /// skipped (busy lock, timeout) keeps its state and contributes nothing.
    pub async fn tick(&mut self, now: Instant) -> Vec<HealthCheckResult> {
        let due: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.next_due <= now)
            .map(|(i, _)| i)
            .collect();
        if due.is_empty() {
            return Vec::new();
        }

        let supervisor = &self.supervisor;
        let evaluations = join_all(due.iter().map(|&i| {
            let name = self.slots[i].name.clone();
            let previous = self.slots[i].state;
            let span = tracing::info_span!("evaluate", daemon = %name);
            async move { supervisor.evaluate(&name, previous).await }.instrument(span)
        }))
        .await;

        let mut results = Vec::with_capacity(due.len());
        for (i, evaluation) in due.into_iter().zip(evaluations) {
            let slot = &mut self.slots[i];
            if slot.state != evaluation.state {
                tracing::debug!(
                    "Daemon '{}': {} -> {}",
                    slot.name,
                    slot.state,
                    evaluation.state
                );
            }
            slot.state = evaluation.state;
            slot.next_due = now + slot.interval;
            if let Some(check) = evaluation.check {
                results.push(check);
            }
        }
        results
    }

    /// Run until the supervisor begins shutting down.
    pub async fn run(mut self) {
        let cancel = self.supervisor.shutdown_token();
        tracing::info!("Health monitor started for {} daemon(s)", self.slots.len());

        loop {
            let Some(due) = self.next_due() else {
                cancel.cancelled().await;
                break;
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Health monitor shutting down");
                    break;
                }
                _ = tokio::time::sleep_until(due) => {}
            }
            apply_tick_jitter().await;

            let now = Instant::now();
            let result = AssertUnwindSafe(self.tick(now)).catch_unwind().await;

            // Log any panics but continue monitoring
            if let Err(panic_info) = result {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                tracing::error!(
                    "Health check tick panicked: {}. Continuing monitoring...",
                    panic_msg
                );
                self.reschedule_due(now);
            }
        }

        tracing::info!("Health monitor stopped");
    }

    fn reschedule_due(&mut self, now: Instant) {
        for slot in self.slots.iter_mut().filter(|s| s.next_due <= now) {
            slot.next_due = now + slot.interval;
        }
    }
}

/// Spread checks of daemons sharing an interval across instances.
async fn apply_tick_jitter() {
    use rand::Rng;
    let jitter_ms = {
        let mut rng = rand::thread_rng();
        rng.gen_range(0..=MAX_TICK_JITTER_MS)
    };
    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(DaemonState::DeadPendingDecision.to_string(), "dead-pending-decision");
        assert_eq!(
            serde_json::to_string(&DaemonState::DeniedWaiting).unwrap(),
            "\"denied_waiting\""
        );
    }
}
