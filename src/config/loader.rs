// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads `default.toml`, deserializes the raw tables and converts them into
//! the runtime [`Config`] (durations, sync mode, listen address).

use log::Level;
use std::{fs, net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use crate::config::model::{
    Config, ConfigError, DatabaseConfig, IngestConfig, MetricsConfig, RawConfig, RawDatabase,
    RawIngest, RawMetrics,
};
use crate::ingest_log;

/// Load and parse the configuration from `path`.
/// Logs at DEBUG before reading and INFO on success.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    ingest_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg = parse(&txt)?;
    ingest_log!(Level::Info, "config", "Loaded config from {:?}", path);
    Ok(cfg)
}

/// Parse TOML text into a runtime [`Config`].
pub fn parse(txt: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(txt)?;
    Ok(Config {
        logging:  raw.logging,
        database: convert_database(raw.database)?,
        ingest:   convert_ingest(raw.ingest)?,
        metrics:  convert_metrics(raw.metrics)?,
    })
}

fn duration(s: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(s).map_err(|e| ConfigError::InvalidDuration(s.into(), e))
}

fn convert_database(raw: RawDatabase) -> Result<DatabaseConfig, ConfigError> {
    let checkpoint_interval = duration(&raw.checkpoint_interval)?;
    if checkpoint_interval.is_zero() {
        return Err(ConfigError::Zero("database.checkpoint_interval"));
    }
    Ok(DatabaseConfig {
        path: PathBuf::from(raw.path),
        purge_on_restart: raw.purge_on_restart,
        synchronous: raw.synchronous.parse()?,
        journal_size_limit: raw.journal_size_limit,
        checkpoint_interval,
    })
}

fn convert_ingest(raw: RawIngest) -> Result<IngestConfig, ConfigError> {
    let defaults = IngestConfig::default();
    let flush_interval = match raw.flush_interval.as_deref() {
        Some(s) => duration(s)?,
        None => defaults.flush_interval,
    };
    // tokio intervals panic on a zero period
    if flush_interval.is_zero() {
        return Err(ConfigError::Zero("ingest.flush_interval"));
    }
    let batch_size = raw.batch_size.unwrap_or(defaults.batch_size);
    if batch_size == 0 {
        return Err(ConfigError::Zero("ingest.batch_size"));
    }
    let channel_capacity = raw.channel_capacity.unwrap_or(defaults.channel_capacity);
    if channel_capacity == 0 {
        return Err(ConfigError::Zero("ingest.channel_capacity"));
    }
    Ok(IngestConfig {
        flush_interval,
        batch_size,
        integrity_endpoint: raw.integrity_endpoint,
        channel_capacity,
    })
}

fn convert_metrics(raw: RawMetrics) -> Result<MetricsConfig, ConfigError> {
    let listen = raw
        .listen
        .map(|s| s.parse::<SocketAddr>().map_err(|e| ConfigError::InvalidAddress(s.clone(), e)))
        .transpose()?;
    Ok(MetricsConfig { listen })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::Synchronous;

    const DATABASE: &str = r#"
        [database]
        path = "mesh.db"
        purge_on_restart = false
        synchronous = "full"
        journal_size_limit = 1000
        checkpoint_interval = "1m"
    "#;

    #[test]
    fn ingest_and_metrics_fall_back_to_defaults() {
        let cfg = parse(DATABASE).unwrap();
        assert_eq!(cfg.database.synchronous, Synchronous::Full);
        assert_eq!(cfg.database.checkpoint_interval, Duration::from_secs(60));
        assert_eq!(cfg.ingest.batch_size, 1_000);
        assert_eq!(cfg.ingest.integrity_endpoint, None);
        assert!(cfg.metrics.listen.is_none());
        assert_eq!(cfg.logging.level, "INFO");
    }

    #[test]
    fn bad_values_are_rejected() {
        let bad_sync = DATABASE.replace("\"full\"", "\"sometimes\"");
        assert!(matches!(parse(&bad_sync), Err(ConfigError::InvalidSynchronous(_))));

        let bad_interval = format!("{DATABASE}\n[ingest]\nflush_interval = \"soon\"\n");
        assert!(matches!(parse(&bad_interval), Err(ConfigError::InvalidDuration(..))));

        let zero_batch = format!("{DATABASE}\n[ingest]\nbatch_size = 0\n");
        assert!(matches!(parse(&zero_batch), Err(ConfigError::Zero(_))));

        let bad_addr = format!("{DATABASE}\n[metrics]\nlisten = \"nowhere\"\n");
        assert!(matches!(parse(&bad_addr), Err(ConfigError::InvalidAddress(..))));
    }
}
