//! Upstream sequence-counter tracking.
//!
//! Integrity-test traffic carries a counter in the first eight payload bytes,
//! ASCII hex (`0000002a-----...`). Every parsed counter is logged to
//! `integrity_test`; gaps only produce warnings and a failure count, they
//! never hold back ingestion.

use chrono::{DateTime, Utc};
use log::Level;
use thiserror::Error;

use crate::ingest_log;

/// Width of the hex counter at the start of the payload.
pub const CHECKSUM_DIGITS: usize = 8;

pub const INSERT_INTEGRITY_SQL: &str =
    "INSERT INTO integrity_test (message_time, db_write_time, checksum_number) VALUES (?1, ?2, ?3)";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("payload too short for a sequence counter ({0} bytes)")]
    TooShort(usize),

    #[error("sequence counter is not hex: {0:?}")]
    NotHex(String),
}

/// Parse the fixed-width counter at the front of `payload`.
pub fn parse_checksum(payload: &[u8]) -> Result<u32, ChecksumError> {
    let digits = payload
        .get(..CHECKSUM_DIGITS)
        .ok_or(ChecksumError::TooShort(payload.len()))?;
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(ChecksumError::NotHex(String::from_utf8_lossy(digits).into_owned()));
    }
    let text = String::from_utf8_lossy(digits);
    u32::from_str_radix(&text, 16).map_err(|_| ChecksumError::NotHex(text.into_owned()))
}

/// One observed counter, waiting for the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityLogEntry {
    pub message_time: DateTime<Utc>,
    pub write_time: DateTime<Utc>,
    pub checksum: u32,
}

/// Result of comparing a counter with the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// First counter ever seen.
    Seeded,
    Contiguous,
    /// Contiguous again after a gap.
    Recovered,
    Gap { expected: u32, actual: u32 },
}

#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    last_checksum: Option<u32>,
    gapped: bool,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_checksum(&self) -> Option<u32> {
        self.last_checksum
    }

    pub fn is_gapped(&self) -> bool {
        self.gapped
    }

    /// Compare `checksum` with the last one and remember it.
    pub fn check(&mut self, checksum: u32) -> SequenceCheck {
        let outcome = match self.last_checksum {
            None => SequenceCheck::Seeded,
            Some(last) if last.wrapping_add(1) == checksum => {
                if std::mem::replace(&mut self.gapped, false) {
                    SequenceCheck::Recovered
                } else {
                    SequenceCheck::Contiguous
                }
            }
            Some(last) => {
                self.gapped = true;
                SequenceCheck::Gap { expected: last.wrapping_add(1), actual: checksum }
            }
        };
        self.last_checksum = Some(checksum);
        outcome
    }
}

/// Tracker plus the entries recorded since the last flush.
#[derive(Debug, Default)]
pub struct IntegrityLog {
    tracker: SequenceTracker,
    entries: Vec<IntegrityLogEntry>,
}

impl IntegrityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    /// Parse, check and record one payload.
    pub fn observe(
        &mut self,
        payload: &[u8],
        message_time: DateTime<Utc>,
    ) -> Result<SequenceCheck, ChecksumError> {
        let checksum = parse_checksum(payload)?;
        let outcome = self.tracker.check(checksum);
        match outcome {
            SequenceCheck::Recovered => {
                ingest_log!(Level::Info, "integrity", "sequence number ok again (number={})", checksum);
            }
            SequenceCheck::Gap { expected, actual } => {
                ingest_log!(
                    Level::Error,
                    "integrity",
                    "sequence check failed: expected={} actual={}",
                    expected,
                    actual
                );
            }
            SequenceCheck::Seeded | SequenceCheck::Contiguous => {}
        }
        self.entries.push(IntegrityLogEntry { message_time, write_time: Utc::now(), checksum });
        Ok(outcome)
    }

    pub fn entries(&self) -> &[IntegrityLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take the pending entries. The tracker keeps its state across flushes.
    pub fn drain(&mut self) -> Vec<IntegrityLogEntry> {
        std::mem::take(&mut self.entries)
    }
}
