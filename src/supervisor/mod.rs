//! The supervisor ties the registry, PID store, restart policy, launcher and
//! logger together. It owns no background tasks itself: the
//! [`HealthMonitor`](crate::monitor::HealthMonitor) drives
//! [`Supervisor::evaluate`], and CLI commands call the operator entry points.

mod instance;
mod lifecycle;
mod lock;
mod status;

pub use instance::{running_supervisor, InstanceGuard, SUPERVISOR_RECORD_NAME};
pub use lifecycle::{Evaluation, ShutdownReport, StopOutcome};
pub use lock::FileLock;
pub use status::{DaemonStatus, StatusState};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, DaemonSpec, DEFAULT_GRACE_PERIOD};
use crate::error::{Error, Result};
use crate::launcher::{Launcher, SystemLauncher};
use crate::logger::{Logger, RotationPolicy};
use crate::monitor::DaemonState;
use crate::pid_store::{PidStore, ProcessInspector, SystemInspector};
use crate::policy::{HistoryStore, RestartPolicy};
use crate::registry::Registry;
use crate::state::StateLayout;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long a single liveness check may take before it counts as inconclusive.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// How long operator commands wait for a daemon's lock.
pub const OPERATOR_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Supervisor {
    registry: Registry,
    layout: StateLayout,
    pid_store: Arc<PidStore>,
    history: HistoryStore,
    policy: RestartPolicy,
    launcher: Arc<dyn Launcher>,
    logger: Arc<Logger>,
    clock: Arc<dyn Clock>,
    grace_period: Duration,
    liveness_timeout: Duration,
    /// Last state reached by an evaluation in this process.
    live_states: Mutex<HashMap<String, DaemonState>>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn builder(registry: Registry) -> SupervisorBuilder {
        SupervisorBuilder::new(registry)
    }

    /// Builder preloaded from a parsed config file. Relative paths resolve
    /// against the directory holding `config_path`.
    pub fn from_config(config: &Config, config_path: &Path) -> Result<SupervisorBuilder> {
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let registry = Registry::from_config(config)?;
        let policy = RestartPolicy::from_config(config, &registry);

        Ok(Self::builder(registry)
            .state_dir(config.resolve_state_dir(&config_dir))
            .work_dir(config_dir)
            .restart_policy(policy)
            .rotation(RotationPolicy::from_config(&config.log))
            .grace_period(config.get_shutdown_grace_period()))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn pid_store(&self) -> &PidStore {
        &self.pid_store
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn grace_period_for(&self, spec: &DaemonSpec) -> Duration {
        spec.get_grace_period().unwrap_or(self.grace_period)
    }

    /// State the monitor loop last left `name` in, if it ran in this process.
    pub fn current_state(&self, name: &str) -> Option<DaemonState> {
        self.live_states.lock().get(name).copied()
    }

    fn set_state(&self, name: &str, state: DaemonState) {
        self.live_states.lock().insert(name.to_string(), state);
    }

    /// Token cancelled once shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop scheduling new spawns. Idempotent.
    pub fn begin_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("Supervisor shutdown requested");
            self.shutdown.cancel();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

pub struct SupervisorBuilder {
    registry: Registry,
    state_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    policy: RestartPolicy,
    launcher: Option<Arc<dyn Launcher>>,
    inspector: Option<Arc<dyn ProcessInspector>>,
    clock: Option<Arc<dyn Clock>>,
    rotation: RotationPolicy,
    grace_period: Duration,
    liveness_timeout: Duration,
}

impl SupervisorBuilder {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            state_dir: None,
            work_dir: None,
            policy: RestartPolicy::default(),
            launcher: None,
            inspector: None,
            clock: None,
            rotation: RotationPolicy::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
        }
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Base directory for relative daemon `cwd` values.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn inspector(mut self, inspector: Arc<dyn ProcessInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn rotation(mut self, rotation: RotationPolicy) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Create the state directory layout and assemble the supervisor.
    pub fn build(self) -> Result<Supervisor> {
        let state_dir = self
            .state_dir
            .ok_or_else(|| Error::Config("No state directory configured".to_string()))?;
        let layout = StateLayout::new(state_dir);
        layout.ensure()?;

        let work_dir = match self.work_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let launcher: Arc<dyn Launcher> = match self.launcher {
            Some(launcher) => launcher,
            None => Arc::new(SystemLauncher::new(layout.logs_dir(), work_dir)),
        };
        let inspector: Arc<dyn ProcessInspector> = match self.inspector {
            Some(inspector) => inspector,
            None => Arc::new(SystemInspector),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        Ok(Supervisor {
            pid_store: Arc::new(PidStore::new(layout.pids_dir(), inspector)),
            history: HistoryStore::new(layout.history_dir()),
            logger: Arc::new(Logger::new(layout.logs_dir(), self.rotation)),
            registry: self.registry,
            layout,
            policy: self.policy,
            launcher,
            clock,
            grace_period: self.grace_period,
            liveness_timeout: self.liveness_timeout,
            live_states: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }
}
