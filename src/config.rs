use crate::classify::{ThresholdTable, Thresholds};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    pub api_base: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub session_file: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub thresholds: ThresholdTable,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_enabled")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            token: None,
            username: None,
            password_env: default_password_env(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: default_heartbeat_enabled(),
            interval_secs: default_heartbeat_interval_secs(),
        }
    }
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
    #[error("invalid configuration: {0}")]
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

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        validate_api_base(&self.api_base)?;
        if self.interval_ms < 100 {
            return Err(ConfigError::Validation(
                "interval_ms must be >= 100".to_string(),
            ));
        }
        if self.history_capacity < 1 {
            return Err(ConfigError::Validation(
                "history_capacity must be >= 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.auth.token_env.trim().is_empty() {
            return Err(ConfigError::Validation(
                "auth.token_env must not be empty".to_string(),
            ));
        }
        if self.heartbeat.enabled && self.heartbeat.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "heartbeat.interval_secs must be >= 1".to_string(),
            ));
        }

        validate_thresholds(&self.thresholds)?;
        Ok(())
    }

    /// Overrides `api_base`, revalidating it.
    pub fn set_api_base(&mut self, api_base: &str) -> Result<(), ConfigError> {
        validate_api_base(api_base)?;
        self.api_base = api_base.to_string();
        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../adminmon.yaml.example")
    }
}

fn validate_api_base(api_base: &str) -> Result<(), ConfigError> {
    let trimmed = api_base.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "api_base '{api_base}' must start with http:// or https://"
        )));
    }
    Ok(())
}

fn validate_thresholds(table: &ThresholdTable) -> Result<(), ConfigError> {
    let entries: [(&str, Thresholds); 5] = [
        ("cpu_percent", table.cpu_percent),
        ("memory_percent", table.memory_percent),
        ("disk_percent", table.disk_percent),
        ("avg_response_ms", table.avg_response_ms),
        ("error_5xx_ratio_percent", table.error_5xx_ratio_percent),
    ];
    for (name, t) in entries {
        if !t.warning.is_finite() || !t.danger.is_finite() || t.warning < 0.0 {
            return Err(ConfigError::Validation(format!(
                "thresholds.{name} must be finite and non-negative"
            )));
        }
        if t.warning >= t.danger {
            return Err(ConfigError::Validation(format!(
                "thresholds.{name}.warning must be below danger"
            )));
        }
    }
    Ok(())
}

const fn default_interval_ms() -> u64 {
    5000
}

const fn default_history_capacity() -> usize {
    60
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_token_env() -> String {
    "ADMINMON_TOKEN".to_string()
}

fn default_password_env() -> String {
    "ADMINMON_PASSWORD".to_string()
}

const fn default_heartbeat_enabled() -> bool {
    true
}

const fn default_heartbeat_interval_secs() -> u64 {
    15
}
