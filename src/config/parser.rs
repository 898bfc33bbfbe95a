use super::Config;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAMES: [&str; 2] = ["warden.yaml", "warden.yml"];

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find config file starting from current directory
    pub fn find_config_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_config_in_dir(&current_dir)
    }

    pub fn find_config_in_dir(dir: &Path) -> Result<PathBuf> {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        // Try parent directory
        if let Some(parent) = dir.parent() {
            return Self::find_config_in_dir(parent);
        }

        Err(Error::Config(
            "Could not find warden.yaml in current directory or any parent".to_string(),
        ))
    }

    /// Load config from file path
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        self.parse_config(&content)
    }

    /// Parse config from YAML string
    pub fn parse_config(&self, content: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::Parse(format!("Failed to parse YAML config: {}", e)))?;

        Ok(config)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_simple_config() {
        let yaml = r#"
shutdown_grace_period: 5s
restart:
  max_restarts: 3
  window: 60m
  cooldown: 60s

daemons:
  - name: watcher
    command: /usr/local/bin/watcher
    args: ["--once"]
    health_check_interval: 5m
    environment:
      RUST_LOG: info

  - name: indexer
    command: indexer
    restart:
      max_restarts: 10
"#;

        let parser = Parser::new();
        let config = parser.parse_config(yaml).unwrap();

        assert_eq!(config.daemons.len(), 2);
        assert_eq!(config.get_shutdown_grace_period(), Duration::from_secs(5));
        let watcher = config.daemon("watcher").unwrap();
        assert_eq!(watcher.args, vec!["--once".to_string()]);
        assert_eq!(
            watcher.get_health_check_interval(),
            Duration::from_secs(300)
        );
        assert_eq!(
            config.daemon("indexer").unwrap().restart.as_ref().unwrap().max_restarts,
            Some(10)
        );
    }

    #[test]
    fn test_find_config_walks_up_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("warden.yml"), "daemons: []\n").unwrap();

        let found = Parser::find_config_in_dir(&nested).unwrap();
        assert_eq!(found, dir.path().join("warden.yml"));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = Parser::new().parse_config("daemons: {").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
