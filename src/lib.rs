//! # Warden
//!
//! A supervisor for a fixed set of long-running background daemons.
//!
//! ## Features
//!
//! - **Detached Launching**: Daemons run in their own session/process group and outlive the supervisor
//! - **PID Reuse Protection**: Liveness checks verify the live process still matches the spawned command
//! - **Rate-Limited Restarts**: A cooldown plus a rolling-window cap contain crash loops
//! - **Per-Daemon Scheduling**: Each daemon is health-checked on its own interval
//! - **Bounded Logs**: Rotated per-daemon logs and an aggregate decision log
//! - **Graceful Shutdown**: Termination request, grace period, then forced kill
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden::{HealthMonitor, Parser, Supervisor};
//!
//! # async fn example() -> Result<(), warden::Error> {
//! let parser = Parser::new();
//! let config_path = parser.find_config_file()?;
//! let config = parser.load_config(&config_path)?;
//! config.validate()?;
//!
//! let supervisor = Arc::new(Supervisor::from_config(&config, &config_path)?.build()?);
//! let monitor = HealthMonitor::new(Arc::clone(&supervisor));
//!
//! // Runs until `supervisor.begin_shutdown()` is called.
//! monitor.run().await;
//! let report = supervisor.shutdown().await;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - Every daemon is a separate OS process; the supervisor never runs worker code.
//! - One scheduling loop evaluates due daemons concurrently, each at most once per tick.
//! - Operator commands and the loop serialize per daemon through lock files in the state directory.

pub mod clock;
pub mod config;
pub mod error;
pub mod launcher;
pub mod logger;
pub mod monitor;
pub mod pid_store;
pub mod policy;
pub mod registry;
pub mod state;
pub mod supervisor;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, DaemonSpec, Parser};
pub use error::{Error, Result};
pub use launcher::{CommandSignature, Launcher, ProcessHandle, SpawnError, SystemLauncher};
pub use logger::{AuditEvent, LogLevel, Logger, RotationPolicy};
pub use monitor::{DaemonState, HealthCheckResult, HealthMonitor};
pub use pid_store::{Liveness, LiveProcess, PidStore, ProcessInspector, ProcessRecord, SystemInspector};
pub use policy::{
    AttemptKind, Decision, DenyReason, EventOutcome, HistoryStore, RestartEvent, RestartLimits,
    RestartPolicy,
};
pub use registry::Registry;
pub use state::StateLayout;
pub use supervisor::{
    DaemonStatus, ShutdownReport, StatusState, StopOutcome, Supervisor, SupervisorBuilder,
};
