// src/db/db_writer.rs

use rusqlite::Connection;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::comms::events::Message;
use crate::config::IngestConfig;
use crate::ingest::{FlushReport, FlushStatistics, IngestSession};

/// Single writer for the ingest pipeline.
///
/// Owns the connection and the session; every flush runs synchronously on
/// this task so no `&Connection` is held across an `.await`.
pub struct DbWriter {
    pub conn: Connection,
    pub rx: mpsc::Receiver<Message>,
    pub session: IngestSession,
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub integrity_endpoint: Option<u8>,
}

impl DbWriter {
    pub fn new(conn: Connection, rx: mpsc::Receiver<Message>, cfg: &IngestConfig) -> Self {
        Self {
            conn,
            rx,
            session: IngestSession::new(),
            flush_interval: cfg.flush_interval,
            batch_size: cfg.batch_size,
            integrity_endpoint: cfg.integrity_endpoint,
        }
    }

    /// Start the writer loop; call inside tokio::spawn.
    pub async fn run(self) -> FlushStatistics {
        self.run_until(std::future::pending()).await
    }

    /// Like [`run`](Self::run), but stops accepting messages once `shutdown`
    /// completes. Messages already queued are drained and flushed.
    ///
    /// Flushes when `batch_size` units are pending, on every interval tick
    /// and once more after the inbox closes.
    pub async fn run_until<F>(mut self, shutdown: F) -> FlushStatistics
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.flush_interval);
        tokio::pin!(shutdown);
        let mut closing = false;

        loop {
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(msg) => {
                        self.accept(&msg);
                        if self.session.pending_units() >= self.batch_size {
                            self.flush();
                        }
                    }
                    None => {
                        self.flush();
                        break;
                    }
                },
                _ = interval.tick() => {
                    self.flush();
                }
                _ = &mut shutdown, if !closing => {
                    log::info!("writer closing inbox");
                    closing = true;
                    self.rx.close();
                }
            }
        }

        log::info!("writer stopped: {}", self.session.stats());
        self.session.stats().clone()
    }

    fn accept(&mut self, msg: &Message) {
        if self.integrity_endpoint == Some(msg.destination_endpoint) {
            self.session.observe_integrity(msg);
        }
        let key = self.session.next_key();
        self.session.record(key, msg);
    }

    fn flush(&mut self) -> FlushReport {
        self.session.flush(&mut self.conn)
    }
}
