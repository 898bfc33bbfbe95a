//! Core configuration types.
//!
//! This module contains the root [`Config`] struct for `warden.yaml`.

use super::{parse_duration_string, DaemonSpec, LogConfig, RestartLimitsConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default state directory, relative to the config file directory.
pub const DEFAULT_STATE_DIR: &str = ".warden";

/// Default grace period between termination request and forced kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Root configuration structure for warden.yaml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Where PID records, restart history, locks and logs live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,

    /// Default grace period for stopping daemons (default: 10s)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_grace_period: Option<String>,

    #[serde(default)]
    pub log: LogConfig,

    /// Restart limits applied to every daemon unless overridden.
    #[serde(default)]
    pub restart: RestartLimitsConfig,

    #[serde(default)]
    pub daemons: Vec<DaemonSpec>,
}

impl Config {
    /// Resolve the state directory against the directory holding the config file.
    pub fn resolve_state_dir(&self, config_dir: &Path) -> PathBuf {
        let raw = self.state_dir.as_deref().unwrap_or(DEFAULT_STATE_DIR);
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            config_dir.join(path)
        }
    }

    /// Get the default shutdown grace period, defaulting to 10 seconds.
    pub fn get_shutdown_grace_period(&self) -> Duration {
        self.shutdown_grace_period
            .as_deref()
            .and_then(parse_duration_string)
            .unwrap_or(DEFAULT_GRACE_PERIOD)
    }

    pub fn daemon(&self, name: &str) -> Option<&DaemonSpec> {
        self.daemons.iter().find(|d| d.name == name)
    }
}
