//! Worker units and the supervisor that scales them with the backlog.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use courier_api::{MAX_MESSAGE_LEN, chunk_text};

use crate::{
    audit::{AuditRecord, AuditSink},
    interpreter::{MessageInterpreter, SessionFactory},
    queue::MessageQueue,
    types::{InboundMessage, OutboundMessage},
};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on concurrently running workers.
    pub max_workers: usize,
    /// Work-queue depth one worker is expected to absorb.
    pub batch_threshold: usize,
    /// Interval between scaling evaluations.
    pub scale_tick: Duration,
    /// How long a worker blocks on the work queue before re-checking its
    /// shutdown signal.
    pub recv_timeout: Duration,
    /// Idle time after which a worker probes the session store.
    pub keep_alive_idle: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            batch_threshold: 30,
            scale_tick: Duration::from_millis(500),
            recv_timeout: Duration::from_millis(200),
            keep_alive_idle: Duration::from_secs(3_600),
        }
    }
}

/// Workers needed for a given backlog: one per `batch_threshold` messages,
/// always at least one, never more than `max_workers`.
pub fn desired_workers(backlog: usize, batch_threshold: usize, max_workers: usize) -> usize {
    backlog
        .div_ceil(batch_threshold.max(1))
        .clamp(1, max_workers.max(1))
}

struct WorkerRecord {
    id: u32,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervisor owning the worker units. The scaling loop is the only writer
/// of pool membership; size stays within `[1, max_workers]` and moves by at
/// most one unit per tick.
pub struct WorkerPool {
    work_queue: MessageQueue<InboundMessage>,
    outbound_queue: MessageQueue<OutboundMessage>,
    audit: AuditSink,
    interpreter: Arc<dyn MessageInterpreter>,
    sessions: Arc<dyn SessionFactory>,
    config: WorkerConfig,
    workers: Vec<WorkerRecord>,
    next_id: u32,
}

impl WorkerPool {
    pub fn new(
        work_queue: MessageQueue<InboundMessage>,
        outbound_queue: MessageQueue<OutboundMessage>,
        audit: AuditSink,
        interpreter: Arc<dyn MessageInterpreter>,
        sessions: Arc<dyn SessionFactory>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            work_queue,
            outbound_queue,
            audit,
            interpreter,
            sessions,
            config,
            workers: Vec::new(),
            next_id: 1,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_ids(&self) -> Vec<u32> {
        self.workers.iter().map(|w| w.id).collect()
    }

    /// Start one worker: allocate its record, hand it a private shutdown
    /// signal, launch it, register it.
    pub fn start_worker(&mut self) {
        let id = self.next_id;
        self.next_id += 1;
        let cancel = CancellationToken::new();
        let unit = WorkerUnit {
            id,
            work_queue: self.work_queue.clone(),
            outbound_queue: self.outbound_queue.clone(),
            audit: self.audit.clone(),
            interpreter: Arc::clone(&self.interpreter),
            sessions: Arc::clone(&self.sessions),
            recv_timeout: self.config.recv_timeout,
            keep_alive_idle: self.config.keep_alive_idle,
        };
        let handle = tokio::spawn(unit.run(cancel.clone()));
        self.workers.push(WorkerRecord { id, cancel, handle });
        info!(worker = id, pool = self.workers.len(), "worker started");
    }

    /// Stop the most recently created worker: signal it, wait for it to
    /// finish its current unit of work, remove its record. The original
    /// worker is never stopped this way.
    pub async fn stop_newest(&mut self) {
        if self.workers.len() <= 1 {
            return;
        }
        if let Some(record) = self.workers.pop() {
            record.cancel.cancel();
            Self::join(record).await;
        }
    }

    /// One scaling evaluation against the live work-queue depth.
    pub async fn scale_tick(&mut self) {
        let backlog = self.work_queue.len();
        self.apply_scale(backlog).await;
    }

    /// Move the pool at most one unit toward the target for `backlog`.
    pub async fn apply_scale(&mut self, backlog: usize) {
        let desired = desired_workers(backlog, self.config.batch_threshold, self.config.max_workers);
        let current = self.workers.len();
        if desired > current {
            debug!(backlog, desired, current, "scaling up");
            self.start_worker();
        } else if desired < current && current > 1 {
            debug!(backlog, desired, current, "scaling down");
            self.stop_newest().await;
        }
    }

    /// Global shutdown: signal every unit, then join each in turn.
    pub async fn shutdown_all(&mut self) {
        for record in &self.workers {
            record.cancel.cancel();
        }
        let workers = std::mem::take(&mut self.workers);
        for record in workers {
            Self::join(record).await;
        }
        info!("worker pool stopped");
    }

    async fn join(record: WorkerRecord) {
        if let Err(e) = record.handle.await {
            warn!(worker = record.id, error = %e, "worker task join failed");
        }
        info!(worker = record.id, "worker stopped");
    }
}

/// One worker unit: pulls one message at a time, runs the interpreter with
/// a fresh session handle, forwards the replies.
struct WorkerUnit {
    id: u32,
    work_queue: MessageQueue<InboundMessage>,
    outbound_queue: MessageQueue<OutboundMessage>,
    audit: AuditSink,
    interpreter: Arc<dyn MessageInterpreter>,
    sessions: Arc<dyn SessionFactory>,
    recv_timeout: Duration,
    keep_alive_idle: Duration,
}

impl WorkerUnit {
    async fn run(self, cancel: CancellationToken) {
        debug!(worker = self.id, "worker loop started");
        let mut last_work = Instant::now();
        while !cancel.is_cancelled() {
            match self.work_queue.recv_timeout(self.recv_timeout).await {
                Some(message) => {
                    last_work = Instant::now();
                    self.process(message).await;
                },
                None => {
                    if last_work.elapsed() >= self.keep_alive_idle {
                        if let Err(e) = self.sessions.keep_alive().await {
                            debug!(worker = self.id, error = %e, "keep-alive probe failed");
                        }
                        last_work = Instant::now();
                    }
                },
            }
        }
        debug!(worker = self.id, "worker loop stopped");
    }

    async fn process(&self, message: InboundMessage) {
        let mut session = match self.sessions.open().await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    worker = self.id,
                    seq = message.seq,
                    error = %e,
                    "session open failed, message skipped"
                );
                return;
            },
        };

        match self.interpreter.interpret(&message, &mut session).await {
            Ok(replies) => {
                for reply in replies {
                    for piece in split_for_delivery(reply) {
                        self.audit.record(AuditRecord::outbound(&piece)).await;
                        self.outbound_queue.send(piece).await;
                    }
                }
            },
            Err(e) => {
                warn!(
                    worker = self.id,
                    seq = message.seq,
                    error = %e,
                    "interpreter failed, message skipped"
                );
            },
        }
    }
}

/// Split an oversized reply into API-sized messages. Reply markup stays on
/// the final piece so a keyboard lands under the last message.
fn split_for_delivery(message: OutboundMessage) -> Vec<OutboundMessage> {
    if message.text.len() <= MAX_MESSAGE_LEN {
        return vec![message];
    }
    let pieces = chunk_text(&message.text, MAX_MESSAGE_LEN);
    let last = pieces.len().saturating_sub(1);
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| OutboundMessage {
            destination: message.destination.clone(),
            text,
            reply_markup: (i == last).then(|| message.reply_markup.clone()).flatten(),
            attempts: 0,
            enqueued_at_ms: message.enqueued_at_ms,
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {async_trait::async_trait, rstest::rstest};

    use super::*;
    use crate::interpreter::{NullSessionFactory, SessionHandle};

    /// Replies to every message with one echo to its chat.
    struct EchoInterpreter;

    #[async_trait]
    impl MessageInterpreter for EchoInterpreter {
        async fn interpret(
            &self,
            message: &InboundMessage,
            _session: &mut SessionHandle,
        ) -> anyhow::Result<Vec<OutboundMessage>> {
            let (Some(text), Some(chat)) = (message.text(), message.chat_id()) else {
                return Ok(Vec::new());
            };
            Ok(vec![OutboundMessage::text(chat, text)])
        }
    }

    fn inbound(seq: i64, text: &str) -> InboundMessage {
        InboundMessage::from_update(
            serde_json::from_value(serde_json::json!({
                "update_id": seq,
                "message": {"text": text, "chat": {"id": 1}},
            }))
            .unwrap(),
        )
    }

    fn pool(config: WorkerConfig) -> (WorkerPool, MessageQueue<InboundMessage>, MessageQueue<OutboundMessage>) {
        let work_queue = MessageQueue::unbounded();
        let outbound_queue = MessageQueue::unbounded();
        let audit_queue = MessageQueue::bounded(1_024);
        let pool = WorkerPool::new(
            work_queue.clone(),
            outbound_queue.clone(),
            AuditSink::new(audit_queue),
            Arc::new(EchoInterpreter),
            Arc::new(NullSessionFactory),
            config,
        );
        (pool, work_queue, outbound_queue)
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(30, 1)]
    #[case(31, 2)]
    #[case(45, 2)]
    #[case(90, 3)]
    #[case(40, 2)]
    #[case(1_000, 5)]
    fn desired_workers_formula(#[case] backlog: usize, #[case] expected: usize) {
        assert_eq!(desired_workers(backlog, 30, 5), expected);
    }

    #[test]
    fn desired_workers_survives_degenerate_inputs() {
        assert_eq!(desired_workers(10, 0, 5), 5);
        assert_eq!(desired_workers(10, 30, 0), 1);
    }

    #[tokio::test]
    async fn pool_size_follows_backlog_one_step_per_tick() {
        let (mut pool, _work, _outbound) = pool(WorkerConfig {
            recv_timeout: Duration::from_millis(20),
            ..WorkerConfig::default()
        });
        pool.start_worker();

        let mut sizes = vec![pool.size()];
        for backlog in [0usize, 45, 90, 90, 40, 0] {
            pool.apply_scale(backlog).await;
            sizes.push(pool.size());
        }

        // One-step-per-tick: reaching 3 takes two readings at backlog 90.
        assert_eq!(sizes, vec![1, 1, 2, 3, 3, 2, 1]);
        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn pool_never_leaves_bounds() {
        let (mut pool, _work, _outbound) = pool(WorkerConfig {
            max_workers: 3,
            recv_timeout: Duration::from_millis(20),
            ..WorkerConfig::default()
        });
        pool.start_worker();

        for backlog in [0usize, 500, 500, 500, 500, 500, 0, 0, 0, 0, 0] {
            pool.apply_scale(backlog).await;
            let size = pool.size();
            assert!((1..=3).contains(&size), "size {size} out of bounds");
        }
        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn downscale_removes_the_newest_worker() {
        let (mut pool, _work, _outbound) = pool(WorkerConfig {
            recv_timeout: Duration::from_millis(20),
            ..WorkerConfig::default()
        });
        pool.start_worker();
        pool.start_worker();
        pool.start_worker();
        assert_eq!(pool.worker_ids(), vec![1, 2, 3]);

        pool.stop_newest().await;
        assert_eq!(pool.worker_ids(), vec![1, 2]);
        pool.stop_newest().await;
        assert_eq!(pool.worker_ids(), vec![1]);
        // The original worker is the last one standing and never removed.
        pool.stop_newest().await;
        assert_eq!(pool.worker_ids(), vec![1]);
        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn workers_interpret_and_forward_replies() {
        let (mut pool, work_queue, outbound_queue) = pool(WorkerConfig {
            recv_timeout: Duration::from_millis(20),
            ..WorkerConfig::default()
        });
        pool.start_worker();

        work_queue.send(inbound(1, "hello")).await;
        let reply = outbound_queue
            .recv_timeout(Duration::from_secs(2))
            .await
            .expect("no reply produced");
        assert_eq!(reply.destination, "1");
        assert_eq!(reply.text, "hello");
        pool.shutdown_all().await;
    }

    #[tokio::test]
    async fn stopping_a_worker_waits_for_its_current_message() {
        struct SlowInterpreter;
        #[async_trait]
        impl MessageInterpreter for SlowInterpreter {
            async fn interpret(
                &self,
                message: &InboundMessage,
                _session: &mut SessionHandle,
            ) -> anyhow::Result<Vec<OutboundMessage>> {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(vec![OutboundMessage::text("1", format!("done-{}", message.seq))])
            }
        }

        let work_queue = MessageQueue::unbounded();
        let outbound_queue = MessageQueue::unbounded();
        let mut pool = WorkerPool::new(
            work_queue.clone(),
            outbound_queue.clone(),
            AuditSink::new(MessageQueue::bounded(64)),
            Arc::new(SlowInterpreter),
            Arc::new(NullSessionFactory),
            WorkerConfig {
                recv_timeout: Duration::from_millis(20),
                ..WorkerConfig::default()
            },
        );
        pool.start_worker();
        pool.start_worker();

        work_queue.send(inbound(5, "slow")).await;
        // Give the worker time to pick the message up, then stop it
        // mid-flight; the reply must still appear.
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.stop_newest().await;
        pool.shutdown_all().await;

        let texts: Vec<String> = outbound_queue.drain().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["done-5".to_string()]);
    }

    #[test]
    fn oversized_reply_is_chunked_with_markup_on_last_piece() {
        let long = "word ".repeat(2_000);
        let message = OutboundMessage::text("9", long)
            .with_reply_markup(serde_json::json!({"keyboard": []}));
        let pieces = split_for_delivery(message);

        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.text.len() <= MAX_MESSAGE_LEN);
            assert_eq!(piece.destination, "9");
        }
        let (last, rest) = pieces.split_last().unwrap();
        assert!(last.reply_markup.is_some());
        assert!(rest.iter().all(|p| p.reply_markup.is_none()));
    }

    #[test]
    fn normal_reply_is_passed_through_untouched() {
        let message = OutboundMessage::text("9", "short");
        let pieces = split_for_delivery(message);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].text, "short");
    }
}
