//! Best-effort audit trail of every message crossing the pipeline.
//!
//! Producers enqueue fire-and-forget through [`AuditSink`]; a single
//! [`AuditLogger`] loop drains the queue into an [`AuditStore`] so disk or
//! database latency never blocks the interactive path. A failed write is
//! logged and the record dropped — audit is not a correctness path.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::io::AsyncWriteExt,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    queue::MessageQueue,
    types::{Direction, InboundMessage, OutboundMessage, now_ms},
};

/// How long a producer waits for room on the audit queue before dropping
/// the record.
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(50);

/// One audited message with its direction tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub direction: Direction,
    pub payload: serde_json::Value,
    pub recorded_at_ms: u64,
}

impl AuditRecord {
    pub fn inbound(message: &InboundMessage) -> Self {
        Self {
            direction: Direction::Inbound,
            payload: serde_json::json!({
                "seq": message.seq,
                "payload": message.payload,
            }),
            recorded_at_ms: now_ms(),
        }
    }

    pub fn outbound(message: &OutboundMessage) -> Self {
        Self::for_outbound(Direction::Outbound, message)
    }

    /// Record for a message the API refused and the sender dropped.
    pub fn rejected(message: &OutboundMessage) -> Self {
        Self::for_outbound(Direction::Rejected, message)
    }

    fn for_outbound(direction: Direction, message: &OutboundMessage) -> Self {
        Self {
            direction,
            payload: serde_json::json!({
                "destination": message.destination,
                "text": message.text,
                "attempts": message.attempts,
            }),
            recorded_at_ms: now_ms(),
        }
    }
}

/// Durable sink for audit records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

/// JSONL file store, one record per line.
pub struct FileAuditStore {
    path: PathBuf,
}

impl FileAuditStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn append(&self, record: &AuditRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryAuditStore {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: &AuditRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// Producer-side handle onto the audit queue.
#[derive(Clone)]
pub struct AuditSink {
    queue: MessageQueue<AuditRecord>,
}

impl AuditSink {
    pub fn new(queue: MessageQueue<AuditRecord>) -> Self {
        Self { queue }
    }

    /// Enqueue a record, waiting at most [`ENQUEUE_TIMEOUT`] for room.
    /// Never blocks the caller longer than that; on a full queue the
    /// record is dropped with a log line.
    pub async fn record(&self, record: AuditRecord) {
        if let Err(dropped) = self.queue.send_timeout(record, ENQUEUE_TIMEOUT).await {
            warn!(
                direction = ?dropped.direction,
                "audit queue full, record dropped"
            );
        }
    }
}

/// The audit loop: pulls records and writes them to the store.
pub struct AuditLogger {
    queue: MessageQueue<AuditRecord>,
    store: Arc<dyn AuditStore>,
    flush_grace: Duration,
}

impl AuditLogger {
    pub fn new(
        queue: MessageQueue<AuditRecord>,
        store: Arc<dyn AuditStore>,
        flush_grace: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            flush_grace,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> crate::Result<()> {
        debug!("audit logger started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                record = self.queue.recv() => self.write(record).await,
            }
        }

        // Drain whatever queued up, bounded by the flush grace.
        let deadline = tokio::time::Instant::now() + self.flush_grace;
        while let Some(record) = self.queue.try_recv() {
            self.write(record).await;
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.queue.len(),
                    "audit flush grace elapsed, remaining records dropped"
                );
                break;
            }
        }
        info!("audit logger stopped");
        Ok(())
    }

    async fn write(&self, record: AuditRecord) {
        if let Err(e) = self.store.append(&record).await {
            warn!(error = %e, "audit write failed, record dropped");
        }
    }
}
