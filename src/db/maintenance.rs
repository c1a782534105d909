// src/db/maintenance.rs
//! Periodic WAL checkpoints on a side connection.

use std::{path::{Path, PathBuf}, time::Duration};
use rusqlite::Connection;
use tokio::{runtime::Runtime, task::JoinHandle};

/// Truncating checkpoint; returns `(busy, log frames, checkpointed frames)`.
pub fn checkpoint(db_path: &Path) -> rusqlite::Result<(i64, i64, i64)> {
    let conn = Connection::open(db_path)?;
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |r| {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?))
    })
}

pub fn spawn_wal_maintenance(rt: &Runtime, db_path: PathBuf, period: Duration) -> JoinHandle<()> {
    rt.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // the first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match checkpoint(&db_path) {
                Ok((0, frames, _)) => log::debug!("WAL checkpoint done ({} frames)", frames),
                Ok(_) => log::debug!("WAL checkpoint skipped, writer busy"),
                Err(e) => log::warn!("WAL checkpoint failed: {}", e),
            }
        }
    })
}
