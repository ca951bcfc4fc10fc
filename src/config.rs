use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_qstat_command")]
    pub qstat_command: Vec<String>,
    #[serde(default = "default_pbsnodes_command")]
    pub pbsnodes_command: Vec<String>,
    /// Queues exported at zero even when the job report has no line for
    /// them. Queues observed outside this set are exported as well.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("config validation error: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn default_config() -> Self {
        Self {
            listen: default_listen(),
            interval_secs: default_interval_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            qstat_command: default_qstat_command(),
            pbsnodes_command: default_pbsnodes_command(),
            queues: default_queues(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }
        if self.command_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "command_timeout_secs must be >= 1".to_string(),
            ));
        }
        validate_command("qstat_command", &self.qstat_command)?;
        validate_command("pbsnodes_command", &self.pbsnodes_command)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_command(name: &str, argv: &[String]) -> Result<(), ConfigError> {
    if argv.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{name} must not be empty"
        )));
    }
    if argv[0].trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "{name}[0] must name an executable"
        )));
    }
    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:8888".to_string()
}

const fn default_interval_secs() -> u64 {
    60
}

const fn default_command_timeout_secs() -> u64 {
    30
}

fn default_qstat_command() -> Vec<String> {
    vec!["qstat".to_string(), "-t".to_string()]
}

fn default_pbsnodes_command() -> Vec<String> {
    vec!["pbsnodes".to_string(), "-aSj".to_string()]
}

fn default_queues() -> Vec<String> {
    [
        "interactive",
        "medium",
        "long",
        "large",
        "small",
        "special",
        "AISG_debug",
        "AISG_large",
        "AISG_guest",
    ]
    .iter()
    .map(|q| q.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default_config()
            .validate()
            .expect("default config must validate");
    }

    #[test]
    fn empty_yaml_falls_back_to_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(cfg.listen, "0.0.0.0:8888");
        assert_eq!(cfg.interval_secs, 60);
        assert_eq!(cfg.qstat_command, vec!["qstat", "-t"]);
        assert_eq!(cfg.queues.len(), 9);
    }

    #[test]
    fn example_yaml_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("parse example");
        cfg.validate().expect("example config must validate");
    }

    #[test]
    fn bad_listen_rejected() {
        let mut cfg = Config::default_config();
        cfg.listen = "not-an-address".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let mut cfg = Config::default_config();
        cfg.interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_command_rejected() {
        let mut cfg = Config::default_config();
        cfg.qstat_command = vec![];
        assert!(cfg.validate().is_err());
    }
}
