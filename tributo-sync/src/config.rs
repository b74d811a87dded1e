//! Configuration loading for the offline sync runtime.
//!
//! Timing fields fall back to their documented defaults; everything else is
//! required.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::monitor::{MonitorConfig, DEFAULT_POLL_INTERVAL};
use crate::probe::DEFAULT_PROBE_TIMEOUT;

pub const CONFIG_ENV_VAR: &str = "TRIBUTO_SYNC_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    pub store_path: PathBuf,
    pub store_max_size_mb: usize,
    #[serde(default)]
    pub auth: AuthConfig,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub bearer_token: Option<String>,
}

/// One monitored backend collection.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Entity type name, e.g. `sector`.
    pub name: String,
    /// Collection path relative to `api_base_url`.
    pub path: String,
    #[serde(default)]
    pub requires_auth: bool,
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT.as_millis() as u64
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or {CONFIG_ENV_VAR})")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl SyncConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.api_base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must be an http(s) URL".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "probe_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "store_path",
                reason: "must not be empty".to_string(),
            });
        }
        if self.store_max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "store_max_size_mb",
                reason: "must be > 0".to_string(),
            });
        }
        if self
            .auth
            .bearer_token
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "auth.bearer_token",
                reason: "must not be blank when present".to_string(),
            });
        }
        if self.endpoints.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "endpoints",
                reason: "at least one endpoint is required".to_string(),
            });
        }
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if endpoint.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "endpoints.name",
                    reason: format!("entry {} has an empty name", i),
                });
            }
            if endpoint.path.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "endpoints.path",
                    reason: format!("endpoint '{}' has an empty path", endpoint.name),
                });
            }
            if self.endpoints[..i].iter().any(|e| e.name == endpoint.name) {
                return Err(ConfigError::InvalidValue {
                    field: "endpoints.name",
                    reason: format!("endpoint '{}' is declared twice", endpoint.name),
                });
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::default().with_poll_interval(self.poll_interval())
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Absolute URL of an endpoint's collection.
    pub fn endpoint_url(&self, endpoint: &EndpointConfig) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim().trim_end_matches('/'),
            endpoint.path.trim_start_matches('/')
        )
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
