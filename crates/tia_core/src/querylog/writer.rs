//! Single-writer front for a [`QueryLog`]: bounded crossbeam channel, dedicated thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::{AppendOutcome, QueryLog};
use crate::domain::NewLogRecord;
use crate::error::AppError;

enum WriterCommand {
    Append(NewLogRecord),
    Flush(Sender<()>),
    Shutdown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriterStats {
    pub replaced: u64,
    pub appended: u64,
    pub diagnostics_only: u64,
    pub rejected: u64,
}

/// Operator-facing storage status shared by the writer thread and every sink.
#[derive(Debug, Default)]
pub struct StorageHealth {
    degraded: AtomicBool,
    diagnostics_only: AtomicU64,
}

impl StorageHealth {
    /// True while the most recent write attempt ended in diagnostics only.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Records that never reached the store since startup.
    pub fn lost_records(&self) -> u64 {
        self.diagnostics_only.load(Ordering::SeqCst)
    }

    fn mark_degraded(&self) {
        self.diagnostics_only.fetch_add(1, Ordering::SeqCst);
        self.degraded.store(true, Ordering::SeqCst);
    }

    fn mark_healthy(&self) {
        self.degraded.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Queue full or writer gone; the record went to diagnostics.
    Dropped,
}

/// Cloneable submission handle. Submitting never blocks.
#[derive(Clone)]
pub struct QueryLogSink {
    tx: Sender<WriterCommand>,
    health: Arc<StorageHealth>,
}

impl QueryLogSink {
    pub fn submit(&self, record: NewLogRecord) -> SubmitOutcome {
        match self.tx.try_send(WriterCommand::Append(record)) {
            Ok(()) => SubmitOutcome::Queued,
            Err(e) => {
                let reason = match &e {
                    TrySendError::Full(_) => "queue full",
                    TrySendError::Disconnected(_) => "writer stopped",
                };
                if let WriterCommand::Append(record) = e.into_inner() {
                    let payload = serde_json::to_string(&record).unwrap_or_default();
                    error!(reason, record = %payload, "query log submission dropped to diagnostics");
                }
                self.health.mark_degraded();
                SubmitOutcome::Dropped
            }
        }
    }

    /// Send a record the store cannot accept straight to diagnostics and flag storage
    /// degraded, the same way a dropped submission is reported.
    pub fn divert(&self, record: &NewLogRecord, err: &AppError) {
        let payload = serde_json::to_string(record).unwrap_or_default();
        error!(
            code = %err.code,
            details = ?err.details,
            record = %payload,
            "query log record diverted to diagnostics"
        );
        self.health.mark_degraded();
    }

    pub fn is_degraded(&self) -> bool {
        self.health.is_degraded()
    }

    pub fn health(&self) -> Arc<StorageHealth> {
        Arc::clone(&self.health)
    }
}

pub struct QueryLogWriter {
    tx: Sender<WriterCommand>,
    handle: Option<JoinHandle<WriterStats>>,
    health: Arc<StorageHealth>,
}

impl QueryLogWriter {
    pub fn spawn(log: QueryLog, capacity: usize) -> Result<Self, AppError> {
        let (tx, rx) = bounded(capacity.max(1));
        let health = Arc::new(StorageHealth::default());
        let worker_health = Arc::clone(&health);
        let handle = std::thread::Builder::new()
            .name("tia-query-log".to_string())
            .spawn(move || writer_loop(log, rx, worker_health))
            .map_err(|e| {
                AppError::new("STORAGE_WRITER_SPAWN_FAILED", "Failed to start query log writer")
                    .with_details(e.to_string())
            })?;
        Ok(Self {
            tx,
            handle: Some(handle),
            health,
        })
    }

    pub fn sink(&self) -> QueryLogSink {
        QueryLogSink {
            tx: self.tx.clone(),
            health: Arc::clone(&self.health),
        }
    }

    pub fn health(&self) -> Arc<StorageHealth> {
        Arc::clone(&self.health)
    }

    /// Block until every record queued before this call has been handled.
    pub fn flush(&self) -> Result<(), AppError> {
        let (ack_tx, ack_rx) = bounded(1);
        self.tx.send(WriterCommand::Flush(ack_tx)).map_err(|_| {
            AppError::new("STORAGE_WRITER_STOPPED", "Query log writer is not running")
        })?;
        ack_rx.recv().map_err(|_| {
            AppError::new("STORAGE_WRITER_STOPPED", "Query log writer exited during flush")
        })
    }

    /// Drain the queue, stop the thread, and report what happened to every record.
    pub fn shutdown(mut self) -> Result<WriterStats, AppError> {
        let _ = self.tx.send(WriterCommand::Shutdown);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                AppError::new("STORAGE_WRITER_PANICKED", "Query log writer thread panicked")
            }),
            None => Ok(WriterStats::default()),
        }
    }
}

impl Drop for QueryLogWriter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(WriterCommand::Shutdown);
            let _ = handle.join();
        }
    }
}

fn writer_loop(log: QueryLog, rx: Receiver<WriterCommand>, health: Arc<StorageHealth>) -> WriterStats {
    let mut stats = WriterStats::default();
    debug!(path = %log.path().display(), "query log writer started");

    while let Ok(cmd) = rx.recv() {
        match cmd {
            WriterCommand::Append(record) => write_one(&log, &record, &health, &mut stats),
            WriterCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            WriterCommand::Shutdown => break,
        }
    }

    // Records submitted before shutdown are still written.
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            WriterCommand::Append(record) => write_one(&log, &record, &health, &mut stats),
            WriterCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            WriterCommand::Shutdown => {}
        }
    }

    debug!(?stats, "query log writer stopped");
    stats
}

fn write_one(log: &QueryLog, record: &NewLogRecord, health: &StorageHealth, stats: &mut WriterStats) {
    match log.append(record) {
        AppendOutcome::Replaced { .. } => {
            stats.replaced += 1;
            health.mark_healthy();
        }
        AppendOutcome::Appended { .. } => {
            stats.appended += 1;
            health.mark_healthy();
        }
        AppendOutcome::DiagnosticsOnly => {
            stats.diagnostics_only += 1;
            health.mark_degraded();
        }
        AppendOutcome::Rejected(e) => {
            warn!(code = %e.code, "query log record rejected by writer");
            stats.rejected += 1;
        }
    }
}
