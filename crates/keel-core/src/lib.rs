pub mod config;
pub mod types;

pub use config::{
    BackendKind, BuildsConfig, ConfigError, EmbeddedConfig, KeelConfig, LogConfig, LogFormat,
    NetworkedConfig, StatsConfig, StorageConfig,
};
pub use types::*;
