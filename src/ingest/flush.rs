//! One flush cycle: integrity rows and every pending unit in a single
//! transaction, parent ids assigned by local arithmetic, then a row-count
//! audit.
//!
//! The parent table must allocate ids contiguously inside one transaction
//! (`AUTOINCREMENT` on a single writer does). The audit compares the growth of
//! `MAX(id)` with the number of units; drift is reported, never corrected.

use std::time::{Duration, Instant};

use log::Level;
use rusqlite::{params, params_from_iter, Connection, Transaction};
use thiserror::Error;

use super::integrity::{IntegrityLogEntry, INSERT_INTEGRITY_SQL};
use super::operation::SqlOperation;
use super::session::IngestSession;
use super::store::{BatchUnit, UnitKey};
use crate::ingest_log;

const MAX_PARENT_ID_SQL: &str = "SELECT COALESCE(MAX(id), 0) FROM received_packets";

#[derive(Debug, Error)]
pub(crate) enum FlushError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("unit {key}: {source}")]
    Unit {
        key: UnitKey,
        #[source]
        source: rusqlite::Error,
    },

    #[error("unit {key}: no rows affected by {sql}")]
    NoRowsAffected { key: UnitKey, sql: String },

    #[error("unit {key}: parent id unknown for {sql}")]
    UnresolvedParent { key: UnitKey, sql: String },

    #[error("integrity row for counter {0} was not written")]
    IntegrityNotWritten(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Idle,
    /// Committed and the audit matched.
    Committed,
    /// Nothing from this cycle was kept.
    RolledBack { reason: String },
    /// Committed, but the parent table grew by a different amount.
    AuditMismatch { expected: u64, actual: u64 },
}

/// What a flush did.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub outcome: FlushOutcome,
    pub units: usize,
    pub integrity_entries: usize,
    /// `MAX(received_packets.id)` before and after the cycle.
    pub id_before: i64,
    pub id_after: i64,
    pub elapsed: Duration,
}

impl FlushReport {
    fn idle() -> Self {
        Self {
            outcome: FlushOutcome::Idle,
            units: 0,
            integrity_entries: 0,
            id_before: 0,
            id_after: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FlushOutcome::Committed | FlushOutcome::Idle)
    }

    /// Parent rows the cycle added, as seen by the audit.
    pub fn rows_added(&self) -> u64 {
        self.id_after.saturating_sub(self.id_before).max(0) as u64
    }
}

impl IngestSession {
    /// Write everything pending and audit the result.
    ///
    /// Never fails: errors roll the cycle back and are reported through the
    /// returned [`FlushReport`], the statistics and the log. Both
    /// accumulators are empty afterwards whatever the outcome.
    pub fn flush(&mut self, conn: &mut Connection) -> FlushReport {
        if self.is_idle() {
            return FlushReport::idle();
        }

        let started = Instant::now();
        let units = self.store.drain();
        let entries = self.integrity.drain();

        let id_before = match max_parent_id(conn) {
            Ok(id) => id,
            Err(e) => {
                ingest_log!(
                    Level::Error,
                    "flush",
                    "cannot read parent id, dropping {} unit(s) and {} integrity row(s): {}",
                    units.len(),
                    entries.len(),
                    e
                );
                self.stats.record_failure(0);
                return FlushReport {
                    outcome: FlushOutcome::RolledBack { reason: e.to_string() },
                    units: units.len(),
                    integrity_entries: entries.len(),
                    id_before: 0,
                    id_after: 0,
                    elapsed: started.elapsed(),
                };
            }
        };

        let written = write_cycle(conn, &entries, &units);

        let id_after = max_parent_id(conn).unwrap_or_else(|e| {
            ingest_log!(Level::Error, "flush", "cannot read parent id after flush: {}", e);
            id_before
        });
        let elapsed = started.elapsed();
        let added = id_after.saturating_sub(id_before).max(0) as u64;
        let expected = units.len() as u64;

        let outcome = match written {
            Err(e) => {
                ingest_log!(
                    Level::Error,
                    "flush",
                    "rolled back {} unit(s) and {} integrity row(s): {}",
                    units.len(),
                    entries.len(),
                    e
                );
                FlushOutcome::RolledBack { reason: e.to_string() }
            }
            Ok(()) if added == expected => FlushOutcome::Committed,
            Ok(()) => {
                ingest_log!(
                    Level::Error,
                    "flush",
                    "row count audit failed: expected {} new parent row(s), found {} (id {} -> {})",
                    expected,
                    added,
                    id_before,
                    id_after
                );
                FlushOutcome::AuditMismatch { expected, actual: added }
            }
        };

        if outcome == FlushOutcome::Committed {
            self.stats.record_success(added, elapsed, Instant::now());
        } else {
            self.stats.record_failure(added);
        }
        ingest_log!(Level::Debug, "flush", "{}", self.stats);

        FlushReport {
            outcome,
            units: units.len(),
            integrity_entries: entries.len(),
            id_before,
            id_after,
            elapsed,
        }
    }
}

fn max_parent_id(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(MAX_PARENT_ID_SQL, [], |row| row.get(0))
}

/// All-or-nothing: the transaction rolls back when dropped uncommitted.
fn write_cycle(
    conn: &mut Connection,
    entries: &[IntegrityLogEntry],
    units: &[BatchUnit],
) -> Result<(), FlushError> {
    let tx = conn.transaction()?;

    {
        let mut stmt = tx.prepare_cached(INSERT_INTEGRITY_SQL)?;
        for entry in entries {
            let affected = stmt.execute(params![
                entry.message_time.timestamp_micros(),
                entry.write_time.timestamp_micros(),
                entry.checksum
            ])?;
            if affected == 0 {
                return Err(FlushError::IntegrityNotWritten(entry.checksum));
            }
        }
    }

    let mut current_id: Option<i64> = None;
    for unit in units {
        execute(&tx, unit.key(), unit.primary(), None)?;

        // read once, then count up
        let id = match current_id {
            None => tx.last_insert_rowid(),
            Some(prev) => prev + 1,
        };
        current_id = Some(id);

        for op in unit.rows().iter().chain(unit.documents()) {
            execute(&tx, unit.key(), op, Some(id))?;
        }
    }

    tx.commit()?;
    Ok(())
}

fn execute(
    tx: &Transaction<'_>,
    key: UnitKey,
    op: &SqlOperation,
    parent: Option<i64>,
) -> Result<(), FlushError> {
    let values = op.resolve(parent).ok_or_else(|| FlushError::UnresolvedParent {
        key,
        sql: op.sql().to_owned(),
    })?;
    let mut stmt = tx
        .prepare_cached(op.sql())
        .map_err(|source| FlushError::Unit { key, source })?;
    let affected = stmt
        .execute(params_from_iter(values))
        .map_err(|source| FlushError::Unit { key, source })?;
    if affected == 0 {
        return Err(FlushError::NoRowsAffected { key, sql: op.sql().to_owned() });
    }
    Ok(())
}
