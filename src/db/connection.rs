// src/db/connection.rs
//! Opening and initialising SQLite with runtime parameters.

use std::{fs, path::{Path, PathBuf}, time::Duration};
use rusqlite::Connection;

use super::{schema, DbError};
use crate::config::DatabaseConfig;

/// Relative paths are resolved against `base_dir`.
pub fn db_path(base_dir: &Path, cfg: &DatabaseConfig) -> PathBuf {
    base_dir.join(&cfg.path)
}

pub fn open_db_connection(path: &Path, cfg: &DatabaseConfig) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_millis(1_000))?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.pragma_update(None, "synchronous", cfg.synchronous.as_str())?;
    Ok(conn)
}

/// Open the database, optionally starting from an empty file, and bring the
/// schema up to date.
pub fn init_database(base_dir: &Path, cfg: &DatabaseConfig) -> Result<Connection, DbError> {
    let path = db_path(base_dir, cfg);

    if cfg.purge_on_restart && path.exists() {
        fs::remove_file(&path)?;
        for suffix in ["-wal", "-shm"] {
            let mut side = path.clone().into_os_string();
            side.push(suffix);
            let _ = fs::remove_file(PathBuf::from(side));
        }
    }

    let conn = open_db_connection(&path, cfg)?;
    conn.pragma_update(None, "journal_size_limit", cfg.journal_size_limit as i64)?;
    schema::apply(&conn)?;

    log::info!("Database ready at {}", path.display());
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn purge_starts_from_an_empty_database() {
        let dir = tempdir().unwrap();
        let mut cfg = DatabaseConfig::default();

        let conn = init_database(dir.path(), &cfg).unwrap();
        conn.execute(
            "INSERT INTO received_packets (logged_time, path_delay_ms, network_address, sink_address,
                 source_address, dest_address, source_endpoint, dest_endpoint, qos, num_bytes)
             VALUES (1, 0, 1, 1, 2, 1, 1, 1, 0, 0)",
            [],
        )
        .unwrap();
        drop(conn);

        let conn = init_database(dir.path(), &cfg).unwrap();
        let kept: i64 = conn.query_row("SELECT COUNT(*) FROM received_packets", [], |r| r.get(0)).unwrap();
        assert_eq!(kept, 1);
        drop(conn);

        cfg.purge_on_restart = true;
        let conn = init_database(dir.path(), &cfg).unwrap();
        let kept: i64 = conn.query_row("SELECT COUNT(*) FROM received_packets", [], |r| r.get(0)).unwrap();
        assert_eq!(kept, 0);
    }

    #[test]
    fn connection_runs_in_wal_mode() {
        let dir = tempdir().unwrap();
        let conn = init_database(dir.path(), &DatabaseConfig::default()).unwrap();
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0)).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
