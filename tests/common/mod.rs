// tests/common/mod.rs
//! Shared fixtures: schema-initialised connections, message builders and a
//! capturing logger.

#![allow(dead_code)]

use log::{Level, LevelFilter, Log, Metadata, Record};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::{Mutex, Once};
use std::thread::{self, ThreadId};

use mesh_ingest::comms::events::{Apdu, Message, MessageKind};
use mesh_ingest::db::batch_inserts::InsertSpec;
use mesh_ingest::db::schema;

// ───── database ─────────────────────────────────────────────────────────────

/// In-memory database with the full schema applied.
pub fn memory_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    schema::apply(&conn).unwrap();
    conn
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .unwrap()
}

// ───── messages ─────────────────────────────────────────────────────────────

pub fn message(kind: MessageKind, source_address: u32, apdu: Value) -> Message {
    Message {
        kind,
        rx_time_ms_epoch: 1_700_000_000_000,
        travel_time_ms: 35,
        network_id: 0x00AB_CDEF,
        source_address,
        destination_address: 1,
        source_endpoint: 247,
        destination_endpoint: 255,
        qos: 1,
        hop_count: Some(2),
        data_payload: Vec::new(),
        apdu: apdu.as_object().cloned().unwrap_or_default(),
    }
}

/// Every required field of `spec` set to `fill`.
pub fn required_fields(spec: &InsertSpec, fill: Value) -> Apdu {
    spec.columns
        .iter()
        .filter(|c| c.required)
        .map(|c| (c.field.to_string(), fill.clone()))
        .collect()
}

/// Integrity-test payload: eight hex digits then filler.
pub fn counter_payload(n: u32) -> Vec<u8> {
    let mut payload = format!("{:08x}", n).into_bytes();
    payload.resize(102, b'-');
    payload
}

pub fn integrity_message(n: u32) -> Message {
    let mut msg = message(MessageKind::Data, 50, json!({}));
    msg.destination_endpoint = 100;
    msg.data_payload = counter_payload(n);
    msg
}

// ───── logging ──────────────────────────────────────────────────────────────

/// Captures records per thread so parallel tests do not see each other.
struct CaptureLogger {
    records: Mutex<Vec<(ThreadId, Level, String, String)>>,
}

static LOGGER: CaptureLogger = CaptureLogger { records: Mutex::new(Vec::new()) };
static INIT: Once = Once::new();

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }
    fn log(&self, record: &Record) {
        self.records.lock().unwrap().push((
            thread::current().id(),
            record.level(),
            record.target().to_string(),
            record.args().to_string(),
        ));
    }
    fn flush(&self) {}
}

/// Install the capturing logger once per test binary.
pub fn capture_logs() {
    INIT.call_once(|| {
        log::set_logger(&LOGGER).expect("another logger is installed");
        log::set_max_level(LevelFilter::Trace);
    });
}

/// Records logged by the current thread since the last call:
/// `(level, target, message)`.
pub fn take_logs() -> Vec<(Level, String, String)> {
    let me = thread::current().id();
    let mut all = LOGGER.records.lock().unwrap();
    let (mine, rest): (Vec<_>, Vec<_>) = all.drain(..).partition(|(tid, ..)| *tid == me);
    *all = rest;
    mine.into_iter().map(|(_, level, target, msg)| (level, target, msg)).collect()
}
