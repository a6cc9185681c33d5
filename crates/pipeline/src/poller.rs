//! Long-poll loop fetching inbound messages and advancing the cursor.

use std::{sync::Arc, time::Duration};

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use courier_api::{ApiClient, RawUpdate};

use crate::{
    audit::{AuditRecord, AuditSink},
    error::PipelineError,
    health::{FailureTracker, HealthState},
    queue::MessageQueue,
    store::StateStore,
    types::{InboundMessage, SeqId},
};

/// Sleep between checks while waiting for the work queue to drain at
/// shutdown.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pacing between polls after a failure. A successful long poll paces
/// itself server-side; a failed one returns immediately and would
/// otherwise spin hot against a dead endpoint.
const POLL_FAILURE_DELAY: Duration = Duration::from_millis(500);

/// The sole owner of the inbound cursor. Exactly one poller may run per
/// cursor; two pollers against the same credential would steal each
/// other's batches.
pub struct InboundPoller {
    client: Arc<ApiClient>,
    work_queue: MessageQueue<InboundMessage>,
    audit: AuditSink,
    store: Arc<StateStore>,
    failures: FailureTracker,
    global: CancellationToken,
    /// Next sequence number expected; `None` until the first batch (the
    /// service then chooses the starting point).
    cursor: Option<SeqId>,
}

impl InboundPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<ApiClient>,
        work_queue: MessageQueue<InboundMessage>,
        audit: AuditSink,
        store: Arc<StateStore>,
        failures: FailureTracker,
        global: CancellationToken,
        cursor: Option<SeqId>,
    ) -> Self {
        Self {
            client,
            work_queue,
            audit,
            store,
            failures,
            global,
            cursor,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> crate::Result<()> {
        info!(cursor = ?self.cursor, "inbound poller started");
        let mut was_disconnected = false;

        while !cancel.is_cancelled() {
            let client = Arc::clone(&self.client);
            tokio::select! {
                () = cancel.cancelled() => break,
                polled = client.poll_updates(self.cursor) => match polled {
                    Ok(updates) => {
                        self.failures.record_success();
                        was_disconnected = false;
                        self.publish(updates).await;
                    },
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "credential rejected, halting pipeline");
                        self.global.cancel();
                        return Err(PipelineError::Auth(e));
                    },
                    Err(e) if e.is_transient() => {
                        let state = self.failures.record_failure();
                        warn!(
                            error = %e,
                            consecutive = self.failures.consecutive_failures(),
                            state = ?state,
                            "poll failed"
                        );
                        if state == HealthState::Disconnected && !was_disconnected {
                            was_disconnected = true;
                            self.persist_cursor().await;
                        }
                        tokio::time::sleep(POLL_FAILURE_DELAY).await;
                    },
                    Err(e) => {
                        // Throttled or rejected poll: retried on the next
                        // iteration without touching the failure streak.
                        warn!(error = %e, "poll rejected, retrying");
                        tokio::time::sleep(POLL_FAILURE_DELAY).await;
                    },
                },
            }
        }

        self.drain_and_persist().await;
        Ok(())
    }

    /// Publish a batch in sequence order and advance the in-memory cursor.
    ///
    /// The cursor moves as soon as the batch is accepted here, before any
    /// worker processes it; it reaches disk only on the outage and shutdown
    /// paths, so the happy path costs no disk write per message.
    async fn publish(&mut self, mut updates: Vec<RawUpdate>) {
        if updates.is_empty() {
            return;
        }
        updates.sort_by_key(|u| u.update_id);
        let next = updates
            .last()
            .map(|u| u.update_id + 1)
            .unwrap_or_default();

        let count = updates.len();
        for update in updates {
            let message = InboundMessage::from_update(update);
            self.audit.record(AuditRecord::inbound(&message)).await;
            self.work_queue.send(message).await;
        }

        self.cursor = Some(next);
        debug!(count, cursor = next, "batch published");
    }

    /// Stop accepting work, wait for the work queue to empty, then persist
    /// the cursor and acknowledge completion by returning.
    async fn drain_and_persist(&self) {
        info!("inbound poller stopping, waiting for the work queue to drain");
        while !self.work_queue.is_empty() {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        self.persist_cursor().await;
        info!(cursor = ?self.cursor, "inbound poller drained");
    }

    async fn persist_cursor(&self) {
        let Some(cursor) = self.cursor else {
            return;
        };
        if let Err(e) = self.store.save_cursor(cursor).await {
            warn!(
                error = %e,
                cursor,
                "cursor persistence failed; a restart may reprocess messages"
            );
        }
    }
}
