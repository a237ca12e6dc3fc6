//! keel.toml configuration parser and environment overrides.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working embedded setup. Environment variables are applied on top of the
//! file by [`KeelConfig::apply_env`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DEFAULT_MAX_DATA_POINTS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    pub storage: StorageConfig,
    pub stats: StatsConfig,
    pub builds: BuildsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Embedded,
    Networked,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "embedded" | "redb" | "local" => Ok(BackendKind::Embedded),
            "networked" | "valkey" | "redis" => Ok(BackendKind::Networked),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub embedded: EmbeddedConfig,
    pub networked: NetworkedConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedConfig {
    pub path: PathBuf,
    pub open_timeout_secs: u64,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/keel/keel.redb"),
            open_timeout_secs: 5,
        }
    }
}

impl EmbeddedConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkedConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
    /// First segment of every key written to the server.
    pub key_prefix: String,
    pub connect_timeout_secs: u64,
    pub io_timeout_secs: u64,
}

impl Default for NetworkedConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            key_prefix: "keel".to_string(),
            connect_timeout_secs: 5,
            io_timeout_secs: 5,
        }
    }
}

impl NetworkedConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Cap on entries kept per pod, traffic or node series.
    pub max_data_points: usize,
    pub janitor_interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            max_data_points: DEFAULT_MAX_DATA_POINTS,
            janitor_interval_secs: 60,
        }
    }
}

impl StatsConfig {
    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildsConfig {
    /// Registry used for images of projects without registry credentials.
    pub local_registry_host: String,
    /// Expiry for queue and stage entries. Only the networked backend enforces it.
    pub build_ttl_days: u64,
    pub max_pod_events: usize,
}

impl Default for BuildsConfig {
    fn default() -> Self {
        Self {
            local_registry_host: "127.0.0.1:5000".to_string(),
            build_ttl_days: 183,
            max_pod_events: 100,
        }
    }
}

impl BuildsConfig {
    pub fn build_ttl(&self) -> Option<Duration> {
        (self.build_ttl_days > 0).then(|| Duration::from_secs(self.build_ttl_days * 24 * 60 * 60))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
}

impl KeelConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KeelConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from an optional file, then apply process environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Override fields from `KEEL_*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("KEEL_STORAGE_BACKEND") {
            self.storage.backend = value
                .parse()
                .map_err(|reason| invalid("KEEL_STORAGE_BACKEND", &value, reason))?;
        }
        if let Some(value) = lookup("KEEL_DB_PATH") {
            self.storage.embedded.path = PathBuf::from(value);
        }
        if let Some(value) = lookup("KEEL_VALKEY_HOST") {
            self.storage.networked.host = value;
        }
        if let Some(value) = lookup("KEEL_VALKEY_PORT") {
            self.storage.networked.port = parse_number("KEEL_VALKEY_PORT", &value)?;
        }
        if let Some(value) = lookup("KEEL_VALKEY_USERNAME") {
            self.storage.networked.username = non_empty(value);
        }
        if let Some(value) = lookup("KEEL_VALKEY_PASSWORD") {
            self.storage.networked.password = non_empty(value);
        }
        if let Some(value) = lookup("KEEL_VALKEY_DB") {
            self.storage.networked.database = parse_number("KEEL_VALKEY_DB", &value)?;
        }
        if let Some(value) = lookup("KEEL_VALKEY_KEY_PREFIX") {
            self.storage.networked.key_prefix = value;
        }
        if let Some(value) = lookup("KEEL_MAX_DATA_POINTS") {
            let max: usize = parse_number("KEEL_MAX_DATA_POINTS", &value)?;
            if max == 0 {
                return Err(invalid(
                    "KEEL_MAX_DATA_POINTS",
                    &value,
                    "must be at least 1".to_string(),
                ));
            }
            self.stats.max_data_points = max;
        }
        if let Some(value) = lookup("KEEL_LOCAL_REGISTRY_HOST") {
            self.builds.local_registry_host = value;
        }
        if let Some(value) = lookup("KEEL_LOG_FORMAT") {
            self.log.format = match value.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => {
                    return Err(invalid(
                        "KEEL_LOG_FORMAT",
                        &value,
                        "expected text or json".to_string(),
                    ));
                }
            };
        }
        Ok(())
    }
}

fn invalid(var: &str, value: &str, reason: String) -> ConfigError {
    ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        reason,
    }
}

fn parse_number<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(var, value, e.to_string()))
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}
