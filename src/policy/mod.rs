//! Restart rate limiting.
//!
//! A launch is allowed only when both hold:
//!
//! 1. **Cooldown**: at least `cooldown` has passed since the last launch
//!    attempt (successful or not) for the daemon.
//! 2. **Rate cap**: fewer than `max_restarts` restarts reached the launcher
//!    within the trailing `window`.
//!
//! Initial starts obey the cooldown but do not consume the restart budget.
//! Decisions are pure functions of the history and the supplied time.

mod history;

pub use history::{
    AttemptKind, EventOutcome, HistoryStore, RestartEvent, DEFAULT_RETENTION,
};

use crate::config::{parse_duration_string, Config, RestartLimitsConfig};
use crate::registry::Registry;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_MAX_RESTARTS: u32 = 3;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartLimits {
    pub max_restarts: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for RestartLimits {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            window: DEFAULT_WINDOW,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

impl RestartLimits {
    /// Overlay the fields set in `config` onto `self`.
    pub fn merged_with(self, config: &RestartLimitsConfig) -> Self {
        Self {
            max_restarts: config.max_restarts.unwrap_or(self.max_restarts),
            window: config
                .window
                .as_deref()
                .and_then(parse_duration_string)
                .unwrap_or(self.window),
            cooldown: config
                .cooldown
                .as_deref()
                .and_then(parse_duration_string)
                .unwrap_or(self.cooldown),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Cooldown { remaining: Duration },
    RateLimitExceeded { restarts: u32, window: Duration },
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Cooldown { .. } => "cooldown",
            DenyReason::RateLimitExceeded { .. } => "rate limit exceeded",
        }
    }

    /// Longer human-readable explanation.
    pub fn detail(&self) -> String {
        match self {
            DenyReason::Cooldown { remaining } => {
                format!("cooldown ({}s remaining)", remaining.as_secs().max(1))
            }
            DenyReason::RateLimitExceeded { restarts, window } => format!(
                "rate limit exceeded ({} restarts in the last {}m)",
                restarts,
                window.as_secs() / 60
            ),
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestartPolicy {
    defaults: RestartLimits,
    overrides: HashMap<String, RestartLimits>,
}

impl RestartPolicy {
    pub fn new(defaults: RestartLimits) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, name: impl Into<String>, limits: RestartLimits) -> Self {
        self.overrides.insert(name.into(), limits);
        self
    }

    /// Build the policy from the top-level `restart` block and each daemon's override.
    pub fn from_config(config: &Config, registry: &Registry) -> Self {
        let defaults = RestartLimits::default().merged_with(&config.restart);
        let mut policy = Self::new(defaults);
        for spec in registry.iter() {
            if let Some(ref overrides) = spec.restart {
                policy = policy.with_override(spec.name.clone(), defaults.merged_with(overrides));
            }
        }
        policy
    }

    pub fn limits_for(&self, name: &str) -> RestartLimits {
        self.overrides.get(name).copied().unwrap_or(self.defaults)
    }

    /// Decide whether `name` may be launched at `now`, given its history.
    pub fn may_restart(&self, name: &str, history: &[RestartEvent], now: DateTime<Utc>) -> Decision {
        let limits = self.limits_for(name);

        if let Some(last_attempt) = history
            .iter()
            .filter(|e| e.reached_launcher())
            .map(|e| e.timestamp)
            .max()
        {
            // A timestamp in the future (clock stepped back) counts as "just now".
            let elapsed = (now - last_attempt).to_std().unwrap_or(Duration::ZERO);
            if elapsed < limits.cooldown {
                return Decision::Deny(DenyReason::Cooldown {
                    remaining: limits.cooldown - elapsed,
                });
            }
        }

        let restarts = restarts_within(history, now, limits.window);
        if restarts >= limits.max_restarts {
            return Decision::Deny(DenyReason::RateLimitExceeded {
                restarts,
                window: limits.window,
            });
        }

        Decision::Allow
    }
}

/// Number of budget-consuming restarts in the `window` ending at `now`.
pub fn restarts_within(history: &[RestartEvent], now: DateTime<Utc>, window: Duration) -> u32 {
    let since = now - chrono::Duration::seconds(window.as_secs() as i64);
    history
        .iter()
        .filter(|e| e.counts_toward_limit() && e.timestamp > since)
        .count() as u32
}

/// Number of restarts that produced a running process in the `window` ending at `now`.
pub fn successful_restarts_within(
    history: &[RestartEvent],
    now: DateTime<Utc>,
    window: Duration,
) -> u32 {
    let since = now - chrono::Duration::seconds(window.as_secs() as i64);
    history
        .iter()
        .filter(|e| e.is_successful_restart() && e.timestamp > since)
        .count() as u32
}
