//! Daemon configuration types.
//!
//! This module contains the [`DaemonSpec`] struct describing one supervised
//! daemon, and the [`RestartLimitsConfig`] block that tunes its restart policy.

use super::{format_duration, parse_duration_string};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default interval between liveness checks for a daemon.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Static description of one supervised daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonSpec {
    /// Unique daemon name. Used as the key for every persisted record.
    pub name: String,

    /// Program to execute. Resolved through PATH when not absolute.
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Time between liveness checks (default: 5m)
    /// Format: duration string like "30s", "5m", "1h"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<String>,

    /// Working directory, relative to the config file directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    /// Time to wait after a termination request before force-killing.
    /// Falls back to the top-level `shutdown_grace_period`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<String>,

    /// Per-daemon override of the top-level `restart` block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartLimitsConfig>,
}

impl DaemonSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(format_duration(interval));
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = Some(format_duration(grace));
        self
    }

    /// Get the health check interval, defaulting to 5 minutes.
    pub fn get_health_check_interval(&self) -> Duration {
        self.health_check_interval
            .as_deref()
            .and_then(parse_duration_string)
            .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL)
    }

    /// Get the grace period, or `None` to use the supervisor-wide default.
    pub fn get_grace_period(&self) -> Option<Duration> {
        self.grace_period.as_deref().and_then(parse_duration_string)
    }
}

/// Restart limits as written in YAML. Every field is optional so a daemon
/// can override just one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartLimitsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,

    /// Rolling window the restart cap applies to (default: 60m)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,

    /// Minimum time between two launch attempts (default: 60s)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<String>,
}

/// Rotation settings for supervisor-managed log files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Size at which a log file is rotated (default: 10485760)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,

    /// Number of rotated files kept next to the live one (default: 5)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backups: Option<usize>,
}
