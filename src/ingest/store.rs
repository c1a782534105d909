//! Keyed accumulator of pending parent/child writes.

use std::collections::HashMap;

use log::Level;

use super::operation::{OperationKind, SqlOperation};
use crate::ingest_log;

/// Caller-assigned key grouping the rows of one message within a cycle.
pub type UnitKey = u64;

/// One parent insert and everything that hangs off it.
#[derive(Debug, Clone)]
pub struct BatchUnit {
    key: UnitKey,
    primary: SqlOperation,
    rows: Vec<SqlOperation>,
    documents: Vec<SqlOperation>,
}

impl BatchUnit {
    fn new(key: UnitKey, primary: SqlOperation) -> Self {
        Self { key, primary, rows: Vec::new(), documents: Vec::new() }
    }

    pub fn key(&self) -> UnitKey {
        self.key
    }

    pub fn primary(&self) -> &SqlOperation {
        &self.primary
    }

    /// Plain child rows, in submission order.
    pub fn rows(&self) -> &[SqlOperation] {
        &self.rows
    }

    /// Document children, in submission order.
    pub fn documents(&self) -> &[SqlOperation] {
        &self.documents
    }

    /// Every operation in execution order: primary, rows, documents.
    pub fn operations(&self) -> impl Iterator<Item = &SqlOperation> {
        std::iter::once(&self.primary)
            .chain(self.rows.iter())
            .chain(self.documents.iter())
    }

    fn push_child(&mut self, op: SqlOperation) {
        match op.kind() {
            OperationKind::Row => self.rows.push(op),
            OperationKind::Document => self.documents.push(op),
        }
    }
}

/// Units in submission order, indexed by key.
#[derive(Debug, Default)]
pub struct BatchUnitStore {
    units: Vec<BatchUnit>,
    index: HashMap<UnitKey, usize>,
}

impl BatchUnitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation for `key`.
    ///
    /// The first operation seen for a key becomes its primary insert. An
    /// operation that references the parent cannot be a primary, so it is
    /// rejected when the key is still unknown.
    pub fn append(&mut self, key: UnitKey, op: SqlOperation) -> bool {
        match self.index.get(&key) {
            Some(&at) => {
                self.units[at].push_child(op);
                true
            }
            None if op.references_parent() => {
                ingest_log!(
                    Level::Warn,
                    "store",
                    "child operation before any primary insert (key={}): {}",
                    key,
                    op.sql()
                );
                false
            }
            None => {
                self.open(key, op);
                true
            }
        }
    }

    /// Append the primary insert for a key that must not exist yet.
    pub fn append_primary(&mut self, key: UnitKey, op: SqlOperation) -> bool {
        if self.index.contains_key(&key) {
            ingest_log!(Level::Warn, "store", "primary insert already recorded (key={})", key);
            return false;
        }
        if op.references_parent() {
            ingest_log!(Level::Warn, "store", "primary insert cannot reference a parent (key={})", key);
            return false;
        }
        self.open(key, op);
        true
    }

    fn open(&mut self, key: UnitKey, primary: SqlOperation) {
        self.index.insert(key, self.units.len());
        self.units.push(BatchUnit::new(key, primary));
    }

    pub fn contains(&self, key: UnitKey) -> bool {
        self.index.contains_key(&key)
    }

    pub fn get(&self, key: UnitKey) -> Option<&BatchUnit> {
        self.index.get(&key).map(|&at| &self.units[at])
    }

    /// Number of units, i.e. parent rows the next flush should add.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Take every unit, leaving the store empty.
    pub fn drain(&mut self) -> Vec<BatchUnit> {
        self.index.clear();
        std::mem::take(&mut self.units)
    }
}
