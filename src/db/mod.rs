// src/db/mod.rs
//! Public façade for DB helpers (re-exports plus spawn_writer).

pub mod batch_inserts;
pub mod connection;
pub mod db_writer;
pub mod maintenance;
pub mod schema;

use rusqlite::Connection;
use thiserror::Error;
use tokio::{runtime::Runtime, sync::mpsc as async_mpsc, task::JoinHandle};

use crate::comms::events::Message;
use crate::config::IngestConfig;
use crate::ingest::FlushStatistics;
pub use db_writer::DbWriter;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawn the writer task that owns `conn` and the ingest session.
///
/// The writer stops once every sender is gone or `shutdown` completes. The
/// handle resolves to the final statistics after the last flush.
pub fn spawn_writer<F>(
    rt: &Runtime,
    conn: Connection,
    rx: async_mpsc::Receiver<Message>,
    cfg: &IngestConfig,
    shutdown: F,
) -> JoinHandle<FlushStatistics>
where
    F: Future<Output = ()> + Send + 'static,
{
    rt.spawn(DbWriter::new(conn, rx, cfg).run_until(shutdown))
}
