use super::{parse_duration_string, Config, RestartLimitsConfig};
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Names reserved for the supervisor's own files in the state directory.
pub const RESERVED_DAEMON_NAMES: [&str; 2] = ["supervisor", "warden"];

const DURATION_HINT: &str = "Use formats like '500ms', '30s', '5m', '1h'";

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(ref gp) = self.shutdown_grace_period {
            if parse_duration_string(gp).is_none() {
                return Err(Error::Validation(format!(
                    "Invalid shutdown_grace_period '{}'. {}",
                    gp, DURATION_HINT
                )));
            }
        }

        if self.log.max_bytes == Some(0) {
            return Err(Error::Validation(
                "log.max_bytes must be greater than zero".to_string(),
            ));
        }

        validate_restart_limits("restart", &self.restart)?;

        if self.daemons.is_empty() {
            return Err(Error::Validation("No daemons configured".to_string()));
        }

        let mut seen = HashSet::new();
        for daemon in &self.daemons {
            validate_daemon_name(&daemon.name)?;

            if !seen.insert(daemon.name.as_str()) {
                return Err(Error::DuplicateDaemon(daemon.name.clone()));
            }

            if daemon.command.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "Daemon '{}' has an empty command",
                    daemon.name
                )));
            }

            if let Some(ref interval) = daemon.health_check_interval {
                match parse_duration_string(interval) {
                    Some(d) if !d.is_zero() => {}
                    Some(_) => {
                        return Err(Error::Validation(format!(
                            "Daemon '{}' has a zero health_check_interval",
                            daemon.name
                        )))
                    }
                    None => {
                        return Err(Error::Validation(format!(
                            "Daemon '{}' has invalid health_check_interval '{}'. {}",
                            daemon.name, interval, DURATION_HINT
                        )))
                    }
                }
            }

            if let Some(ref gp) = daemon.grace_period {
                if parse_duration_string(gp).is_none() {
                    return Err(Error::Validation(format!(
                        "Daemon '{}' has invalid grace_period '{}'. {}",
                        daemon.name, gp, DURATION_HINT
                    )));
                }
            }

            if let Some(ref restart) = daemon.restart {
                validate_restart_limits(&format!("Daemon '{}' restart", daemon.name), restart)?;
            }
        }

        Ok(())
    }
}

fn validate_daemon_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("Daemon name cannot be empty".to_string()));
    }
    // Names become file names under the state directory.
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || name.starts_with('.')
    {
        return Err(Error::Validation(format!(
            "Daemon name '{}' may only contain letters, digits, '-', '_' and '.', and cannot start with '.'",
            name
        )));
    }
    if RESERVED_DAEMON_NAMES.contains(&name) {
        return Err(Error::Validation(format!(
            "Daemon name '{}' is reserved",
            name
        )));
    }
    Ok(())
}

fn validate_restart_limits(context: &str, limits: &RestartLimitsConfig) -> Result<()> {
    if limits.max_restarts == Some(0) {
        return Err(Error::Validation(format!(
            "{} has max_restarts 0; a daemon must be allowed at least one restart",
            context
        )));
    }
    if let Some(ref window) = limits.window {
        match parse_duration_string(window) {
            Some(d) if !d.is_zero() => {}
            _ => {
                return Err(Error::Validation(format!(
                    "{} has invalid window '{}'. {}",
                    context, window, DURATION_HINT
                )))
            }
        }
    }
    if let Some(ref cooldown) = limits.cooldown {
        if parse_duration_string(cooldown).is_none() {
            return Err(Error::Validation(format!(
                "{} has invalid cooldown '{}'. {}",
                context, cooldown, DURATION_HINT
            )));
        }
    }
    Ok(())
}
