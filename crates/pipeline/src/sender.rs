//! Rate-limited delivery loop with bounded retry and backlog persistence.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use courier_api::{ApiClient, Error as ApiError};

use crate::{
    audit::{AuditRecord, AuditSink},
    error::PipelineError,
    health::{FailureTracker, OutageFlag},
    queue::MessageQueue,
    store::StateStore,
    types::OutboundMessage,
};

/// Cap on how long a single rate-limit wait is honored before the message
/// goes back to the queue anyway.
const MAX_RETRY_AFTER_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Minimum interval between two sends, globally.
    pub send_interval: Duration,
    /// Minimum interval between two sends to the same destination.
    pub per_destination_interval: Duration,
    /// Delivery attempts per message before capture to disk.
    pub max_attempts: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_millis(50),
            per_destination_interval: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

/// Drains the outbound queue into the API. Producers only enqueue; nothing
/// else calls the API send path.
pub struct OutboundSender {
    client: Arc<ApiClient>,
    queue: MessageQueue<OutboundMessage>,
    audit: AuditSink,
    store: Arc<StateStore>,
    outage: OutageFlag,
    failures: FailureTracker,
    global: CancellationToken,
    config: SenderConfig,
    last_send: HashMap<String, Instant>,
    /// Messages captured to disk during the current outage. Mirrors the
    /// backlog file until the next replay.
    captured: Vec<OutboundMessage>,
}

impl OutboundSender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<ApiClient>,
        queue: MessageQueue<OutboundMessage>,
        audit: AuditSink,
        store: Arc<StateStore>,
        outage: OutageFlag,
        failures: FailureTracker,
        global: CancellationToken,
        config: SenderConfig,
    ) -> Self {
        Self {
            client,
            queue,
            audit,
            store,
            outage,
            failures,
            global,
            config,
            last_send: HashMap::new(),
            captured: Vec::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> crate::Result<()> {
        info!("outbound sender started");
        self.replay_backlog().await;

        let mut in_outage = false;
        while !cancel.is_cancelled() {
            if self.outage.is_raised() {
                if !in_outage {
                    in_outage = true;
                    info!("outage observed, capturing outbound queue to disk");
                }
                if let Some(message) = self.queue.recv_timeout(self.config.send_interval).await {
                    self.capture(message).await;
                }
                continue;
            }
            if in_outage {
                in_outage = false;
                info!("connection recovered, replaying captured backlog");
                self.replay_backlog().await;
            }

            match self.queue.recv_timeout(self.config.send_interval).await {
                Some(message) => {
                    self.dispatch(message).await?;
                    // Global send pacing.
                    tokio::time::sleep(self.config.send_interval).await;
                },
                None => continue,
            }
        }

        self.persist_remainder().await;
        info!("outbound sender stopped");
        Ok(())
    }

    /// Deliver one message with bounded retry.
    async fn dispatch(&mut self, mut message: OutboundMessage) -> crate::Result<()> {
        // Per-destination pacing: a too-soon message rotates to the back of
        // the queue. Rotation keeps per-destination FIFO order because
        // every rotated message re-enters in its original relative order.
        if let Some(last) = self.last_send.get(&message.destination)
            && last.elapsed() < self.config.per_destination_interval
        {
            self.queue.send(message).await;
            return Ok(());
        }

        loop {
            message.attempts += 1;
            match self
                .client
                .send_message(
                    &message.destination,
                    &message.text,
                    message.reply_markup.as_ref(),
                )
                .await
            {
                Ok(()) => {
                    self.failures.record_success();
                    self.last_send
                        .insert(message.destination.clone(), Instant::now());
                    debug!(
                        destination = %message.destination,
                        attempts = message.attempts,
                        "message delivered"
                    );
                    return Ok(());
                },
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "credential rejected, halting pipeline");
                    self.global.cancel();
                    return Err(PipelineError::Auth(e));
                },
                Err(ApiError::RateLimited { retry_after }) => {
                    // Throttling is not a delivery failure: the attempt
                    // does not count and the message is never lost.
                    message.attempts -= 1;
                    warn!(
                        destination = %message.destination,
                        retry_after = ?retry_after,
                        "send throttled, retrying on the normal cadence"
                    );
                    if let Some(wait) = retry_after {
                        tokio::time::sleep(wait.min(MAX_RETRY_AFTER_WAIT)).await;
                    }
                    self.queue.push_front(message);
                    return Ok(());
                },
                Err(ApiError::Client { code, description }) => {
                    // Retrying would repeat the same rejected request.
                    warn!(
                        destination = %message.destination,
                        code,
                        description = %description,
                        "send rejected, message dropped"
                    );
                    self.audit.record(AuditRecord::rejected(&message)).await;
                    return Ok(());
                },
                Err(e) => {
                    self.failures.record_failure();
                    warn!(
                        destination = %message.destination,
                        error = %e,
                        attempts = message.attempts,
                        "delivery attempt failed"
                    );
                    if message.attempts >= self.config.max_attempts {
                        self.capture(message).await;
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Move one message into the persisted backlog instead of dropping it.
    async fn capture(&mut self, message: OutboundMessage) {
        debug!(
            destination = %message.destination,
            attempts = message.attempts,
            "capturing undelivered message"
        );
        self.captured.push(message);
        if let Err(e) = self.store.save_backlog(&self.captured).await {
            warn!(
                error = %e,
                pending = self.captured.len(),
                "backlog persistence failed; messages held in memory only"
            );
        }
    }

    /// Re-enqueue the persisted backlog ahead of newer work, then delete
    /// the file. Runs at startup and again whenever an outage clears.
    async fn replay_backlog(&mut self) {
        let from_disk = match self.store.load_backlog().await {
            Ok(backlog) => backlog,
            Err(e) => {
                warn!(error = %e, "backlog file unreadable");
                Vec::new()
            },
        };
        // The in-memory copy wins when a disk write failed mid-outage.
        let backlog = if self.captured.len() > from_disk.len() {
            std::mem::take(&mut self.captured)
        } else {
            self.captured.clear();
            from_disk
        };
        if backlog.is_empty() {
            return;
        }

        info!(count = backlog.len(), "replaying persisted backlog");
        for message in backlog.into_iter().rev() {
            self.queue.push_front(message);
        }
        if let Err(e) = self.store.clear_backlog().await {
            warn!(error = %e, "failed to delete replayed backlog file");
        }
    }

    /// At shutdown: whatever is still unsent (captured plus queued) goes to
    /// disk for the next run.
    async fn persist_remainder(&mut self) {
        let mut remainder = std::mem::take(&mut self.captured);
        remainder.extend(self.queue.drain());
        if remainder.is_empty() {
            return;
        }
        info!(count = remainder.len(), "persisting undelivered messages");
        if let Err(e) = self.store.save_backlog(&remainder).await {
            warn!(
                error = %e,
                count = remainder.len(),
                "backlog persistence failed; these messages will be lost"
            );
        }
    }
}
