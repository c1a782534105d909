//! The writer-owned accumulator: pending units, the integrity log and the
//! running statistics.

use log::Level;

use super::integrity::{IntegrityLog, SequenceCheck};
use super::operation::SqlOperation;
use super::stats::FlushStatistics;
use super::store::{BatchUnitStore, UnitKey};
use crate::comms::events::Message;
use crate::db::batch_inserts;
use crate::ingest_log;

/// All state that lives between two flushes.
///
/// Not synchronized. One session belongs to one writer; producers reach it
/// through that writer's inbox.
#[derive(Debug, Default)]
pub struct IngestSession {
    pub(crate) store: BatchUnitStore,
    pub(crate) integrity: IntegrityLog,
    pub(crate) stats: FlushStatistics,
    next_key: UnitKey,
}

impl IngestSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A key not used by any unit of the current cycle.
    pub fn next_key(&mut self) -> UnitKey {
        let key = self.next_key;
        self.next_key = self.next_key.wrapping_add(1);
        key
    }

    /// See [`BatchUnitStore::append`].
    pub fn append(&mut self, key: UnitKey, op: SqlOperation) -> bool {
        self.store.append(key, op)
    }

    /// See [`BatchUnitStore::append_primary`].
    pub fn append_primary(&mut self, key: UnitKey, op: SqlOperation) -> bool {
        self.store.append_primary(key, op)
    }

    /// Queue the parent row and all child rows for `msg` under `key`.
    ///
    /// Every statement is built before anything is queued, so a message with
    /// a malformed apdu or out-of-range times leaves the store untouched.
    pub fn record(&mut self, key: UnitKey, msg: &Message) -> bool {
        let built = batch_inserts::received_packet(msg)
            .and_then(|primary| Ok((primary, batch_inserts::children(msg)?)));
        let (primary, children) = match built {
            Ok(built) => built,
            Err(e) => {
                ingest_log!(
                    Level::Warn,
                    "session",
                    "dropping {:?} from {}: {}",
                    msg.kind,
                    msg.source_address,
                    e
                );
                return false;
            }
        };

        if !self.store.append_primary(key, primary) {
            return false;
        }
        for op in children {
            self.store.append(key, op);
        }
        true
    }

    /// Feed the payload's sequence counter to the integrity checker.
    pub fn observe_integrity(&mut self, msg: &Message) -> bool {
        match self.integrity.observe(&msg.data_payload, msg.rx_time()) {
            Ok(SequenceCheck::Gap { .. }) => {
                self.stats.record_integrity_failure();
                true
            }
            Ok(_) => true,
            Err(e) => {
                ingest_log!(
                    Level::Error,
                    "integrity",
                    "cannot read sequence counter from {}: {}",
                    msg.source_address,
                    e
                );
                false
            }
        }
    }

    pub fn stats(&self) -> &FlushStatistics {
        &self.stats
    }

    pub fn store(&self) -> &BatchUnitStore {
        &self.store
    }

    pub fn integrity_log(&self) -> &IntegrityLog {
        &self.integrity
    }

    /// Parent rows waiting for the next flush.
    pub fn pending_units(&self) -> usize {
        self.store.len()
    }

    /// True when a flush would have nothing to write.
    pub fn is_idle(&self) -> bool {
        self.store.is_empty() && self.integrity.is_empty()
    }
}
