//! Running flush counters and derived rates.

use std::fmt;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Counters describing every flush cycle since startup.
///
/// Never reset. Monitoring reads a clone; nothing here feeds back into
/// control flow.
#[derive(Debug, Clone, Default)]
pub struct FlushStatistics {
    /// Cycles that committed and passed the row-count audit.
    pub flushes_ok: u64,
    /// Cycles that rolled back or failed the audit.
    pub flushes_failed: u64,
    /// Write errors and audit mismatches.
    pub exceptions: u64,
    /// Sequence gaps seen by the integrity checker.
    pub integrity_failures: u64,
    /// Parent rows added across all cycles, as measured by the audit.
    pub rows_added: u64,
    /// Duration of the last successful flush.
    pub last_flush: Duration,
    /// Parent rows per second during the last successful flush.
    pub throughput: f64,
    /// Last flush time over wall time since the previous successful flush.
    pub load: f64,
    last_success_at: Option<Instant>,
}

impl FlushStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Percentage of cycles that succeeded; 0 before the first cycle.
    pub fn success_ratio(&self) -> f64 {
        let total = self.flushes_ok + self.flushes_failed;
        if total == 0 {
            return 0.0;
        }
        self.flushes_ok as f64 / total as f64 * 100.0
    }

    pub(crate) fn record_success(&mut self, rows: u64, elapsed: Duration, finished_at: Instant) {
        self.flushes_ok += 1;
        self.rows_added += rows;
        self.last_flush = elapsed;

        let secs = elapsed.as_secs_f64();
        self.throughput = if rows > 0 && secs > 0.0 { rows as f64 / secs } else { 0.0 };

        let interval = self
            .last_success_at
            .map(|prev| finished_at.saturating_duration_since(prev))
            .unwrap_or_default();
        self.load = if interval.is_zero() { 0.0 } else { secs / interval.as_secs_f64() };
        self.last_success_at = Some(finished_at);

        counter!("mesh_ingest_flush_total", "outcome" => "ok").increment(1);
        counter!("mesh_ingest_rows_total").increment(rows);
        histogram!("mesh_ingest_flush_seconds").record(secs);
        gauge!("mesh_ingest_flush_load").set(self.load);
    }

    pub(crate) fn record_failure(&mut self, rows: u64) {
        self.flushes_failed += 1;
        self.exceptions += 1;
        self.rows_added += rows;

        counter!("mesh_ingest_flush_total", "outcome" => "failed").increment(1);
        counter!("mesh_ingest_exceptions_total").increment(1);
        counter!("mesh_ingest_rows_total").increment(rows);
    }

    pub(crate) fn record_integrity_failure(&mut self) {
        self.integrity_failures += 1;
        counter!("mesh_ingest_integrity_failures_total").increment(1);
    }
}

impl fmt::Display for FlushStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flushes ok/nok:{}/{} ({:.1}%) rows:{} last:{} ms ({:.2} rows/sec) load:{:.1}% exceptions:{} icheck fails:{}",
            self.flushes_ok,
            self.flushes_failed,
            self.success_ratio(),
            self.rows_added,
            self.last_flush.as_millis(),
            self.throughput,
            self.load * 100.0,
            self.exceptions,
            self.integrity_failures
        )
    }
}
