mod logs;
mod restart;
mod start;
mod status;
mod stop;
mod validate;

pub use logs::run_logs;
pub use restart::run_restart;
pub use start::{run_start_all, run_start_detached};
pub use status::run_status;
pub use stop::run_stop_all;
pub use validate::run_validate;

use std::path::PathBuf;
use warden::{Config, Parser as ConfigParser, Supervisor, SupervisorBuilder};

/// Global CLI options shared by every command.
pub struct Context {
    config: Option<PathBuf>,
    state_dir: Option<PathBuf>,
}

impl Context {
    pub fn new(config: Option<PathBuf>, state_dir: Option<PathBuf>) -> Self {
        Self { config, state_dir }
    }

    pub fn config_path(&self) -> warden::Result<PathBuf> {
        match self.config {
            Some(ref path) => Ok(path.clone()),
            None => ConfigParser::new().find_config_file(),
        }
    }

    /// Load and validate the config.
    pub fn load(&self) -> anyhow::Result<(Config, PathBuf)> {
        let config_path = self.config_path()?;
        let config = ConfigParser::new().load_config(&config_path)?;
        config.validate()?;
        Ok((config, config_path))
    }

    pub fn builder(&self) -> anyhow::Result<SupervisorBuilder> {
        let (config, config_path) = self.load()?;
        let mut builder = Supervisor::from_config(&config, &config_path)?;
        if let Some(ref dir) = self.state_dir {
            builder = builder.state_dir(dir.clone());
        }
        Ok(builder)
    }

    pub fn supervisor(&self) -> anyhow::Result<Supervisor> {
        Ok(self.builder()?.build()?)
    }

    /// Arguments that make a child `warden` resolve the same config and state.
    pub fn forwarded_args(&self, config_path: &std::path::Path) -> Vec<String> {
        let mut args = vec![
            "--config".to_string(),
            absolute(config_path).display().to_string(),
        ];
        if let Some(ref dir) = self.state_dir {
            args.push("--state-dir".to_string());
            args.push(absolute(dir).display().to_string());
        }
        args
    }
}

fn absolute(path: &std::path::Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
