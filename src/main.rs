// src/main.rs

//! mesh-ingest entry point.
//!
//! 1. Parse configuration & set up structured logging
//! 2. Install the Prometheus exporter when `[metrics] listen` is set
//! 3. Initialise SQLite (WAL) and spawn the writer and checkpoint tasks
//! 4. Forward JSON-lines messages from stdin to the writer
//! 5. Stop on EOF or Ctrl-C, run the last flush and report statistics

use anyhow::{Context, Result};
use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::{
    path::{Path, PathBuf},
    process,
    thread,
};
use tokio::runtime::Runtime;
use tokio::sync::mpsc as async_mpsc;

use mesh_ingest::comms::{events::Message, listeners::spawn_stdin_listener};
use mesh_ingest::config::{self, Config, LoggingConfig};
use mesh_ingest::db::{
    connection::{db_path, init_database},
    maintenance::spawn_wal_maintenance,
    spawn_writer,
};

// ───── helpers ──────────────────────────────────────────────────────────────

/// First CLI argument, or `default.toml` next to the executable.
fn config_path() -> Result<PathBuf> {
    if let Some(arg) = std::env::args_os().nth(1) {
        return Ok(PathBuf::from(arg));
    }
    let exe = std::env::current_exe().context("cannot determine executable path")?;
    let dir = exe.parent().context("executable has no parent directory")?;
    Ok(dir.join("default.toml"))
}

/// Configure global logging as requested in `[logging]`.
fn setup_logging(base_dir: &Path, logging: &LoggingConfig) -> Result<(), fern::InitError> {
    let level = match logging.level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let log_path = logging
        .enable
        .then(|| base_dir.join(logging.file.as_deref().unwrap_or("mesh-ingest.log")));

    // stderr, so the process can sit at the end of a pipe
    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// Resolves on Ctrl-C. Never resolves if the signal cannot be watched.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    log::warn!("Shutdown requested");
}

fn install_metrics(rt: &Runtime, cfg: &Config) -> Result<()> {
    let Some(addr) = cfg.metrics.listen else {
        return Ok(());
    };
    let _guard = rt.enter();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing Prometheus exporter")?;
    log::info!("Prometheus exporter listening on {}", addr);
    Ok(())
}

// ───── main ─────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // 1 ─ Context
    let cfg_path = config_path()?;
    let cfg = config::load(&cfg_path)
        .with_context(|| format!("loading {}", cfg_path.display()))?;
    let base_dir = cfg_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    // 2 ─ Logging
    setup_logging(&base_dir, &cfg.logging).context("logging setup failed")?;
    log::info!("mesh-ingest starting with {}", cfg_path.display());

    // 3 ─ Runtime & metrics
    let rt = Runtime::new().context("tokio runtime creation failed")?;
    install_metrics(&rt, &cfg)?;

    // 4 ─ Database, writer, maintenance
    let conn = init_database(&base_dir, &cfg.database).context("database init failed")?;
    let (tx, rx) = async_mpsc::channel::<Message>(cfg.ingest.channel_capacity);
    let writer = spawn_writer(&rt, conn, rx, &cfg.ingest, shutdown_signal());
    spawn_wal_maintenance(
        &rt,
        db_path(&base_dir, &cfg.database),
        cfg.database.checkpoint_interval,
    );

    // 5 ─ Inbound
    spawn_stdin_listener(tx).context("spawning stdin listener")?;

    // 6 ─ Wait for EOF or Ctrl-C; either way the writer flushes once more
    let stats = rt.block_on(writer);

    let stats = stats.context("writer task failed")?;
    log::info!("final statistics: {}", stats);
    Ok(())
}
