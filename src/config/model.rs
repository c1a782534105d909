// src/config/model.rs

use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

/// Top-level runtime config
#[derive(Debug, Clone)]
pub struct Config {
    pub logging:  LoggingConfig,
    pub database: DatabaseConfig,
    pub ingest:   IngestConfig,
    pub metrics:  MetricsConfig,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]            pub enable: bool,
    #[serde(default)]            pub file:   Option<String>,
    #[serde(default = "default_level")] pub level: String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level() }
    }
}

/// Runtime form of the `[database]` table
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path:                PathBuf,
    pub purge_on_restart:    bool,
    pub synchronous:         Synchronous,
    pub journal_size_limit:  u64,
    pub checkpoint_interval: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path:                PathBuf::from("telemetry.db"),
            purge_on_restart:    false,
            synchronous:         Synchronous::Normal,
            journal_size_limit:  50_000_000,
            checkpoint_interval: Duration::from_secs(300),
        }
    }
}

/// Runtime form of the `[ingest]` table
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub flush_interval:     Duration,
    /// Pending units that trigger a flush before the interval elapses.
    pub batch_size:         usize,
    /// Destination endpoint whose payloads carry sequence counters.
    pub integrity_endpoint: Option<u8>,
    pub channel_capacity:   usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            flush_interval:     Duration::from_secs(2),
            batch_size:         1_000,
            integrity_endpoint: None,
            channel_capacity:   10_000,
        }
    }
}

/// Runtime form of the `[metrics]` table
#[derive(Debug, Clone, Default)]
pub struct MetricsConfig {
    /// Prometheus scrape address; no exporter when unset.
    pub listen: Option<SocketAddr>,
}

/// `PRAGMA synchronous` levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synchronous {
    Off,
    Normal,
    Full,
    Extra,
}

impl Synchronous {
    pub fn as_str(&self) -> &'static str {
        match self {
            Synchronous::Off    => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full   => "FULL",
            Synchronous::Extra  => "EXTRA",
        }
    }
}

/// Allow `"normal"` → `Synchronous::Normal`
impl FromStr for Synchronous {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off"    => Ok(Synchronous::Off),
            "normal" => Ok(Synchronous::Normal),
            "full"   => Ok(Synchronous::Full),
            "extra"  => Ok(Synchronous::Extra),
            other    => Err(ConfigError::InvalidSynchronous(other.into())),
        }
    }
}

/// Raw TOML, before durations and enums are parsed
#[derive(Debug, Deserialize)]
pub(crate) struct RawConfig {
    #[serde(default)] pub logging:  LoggingConfig,
    pub database: RawDatabase,
    #[serde(default)] pub ingest:   RawIngest,
    #[serde(default)] pub metrics:  RawMetrics,
}

/// `[database]` has no defaults: every key must be present
#[derive(Debug, Deserialize)]
pub(crate) struct RawDatabase {
    pub path:                String,
    pub purge_on_restart:    bool,
    pub synchronous:         String,
    pub journal_size_limit:  u64,
    pub checkpoint_interval: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawIngest {
    #[serde(default)] pub flush_interval:     Option<String>,
    #[serde(default)] pub batch_size:         Option<usize>,
    #[serde(default)] pub integrity_endpoint: Option<u8>,
    #[serde(default)] pub channel_capacity:   Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawMetrics {
    #[serde(default)] pub listen: Option<String>,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid synchronous mode '{0}'")]
    InvalidSynchronous(String),

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("invalid listen address '{0}': {1}")]
    InvalidAddress(String, #[source] std::net::AddrParseError),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
