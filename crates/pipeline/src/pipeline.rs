//! Construction and wiring of the whole delivery pipeline.

use std::{sync::Arc, time::Duration};

use {
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use courier_api::ApiClient;

use crate::{
    audit::{AuditLogger, AuditSink, AuditStore},
    error::PipelineError,
    health::{FailureTracker, OutageFlag},
    interpreter::{MessageInterpreter, SessionFactory},
    poller::InboundPoller,
    queue::MessageQueue,
    sender::{OutboundSender, SenderConfig},
    shutdown::{ComponentHandle, ShutdownCoordinator, ShutdownReport},
    store::StateStore,
    workers::{WorkerConfig, WorkerPool},
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub worker: WorkerConfig,
    pub sender: SenderConfig,
    /// Capacity of the audit queue; producers drop records rather than
    /// block when it is full.
    pub audit_queue_capacity: usize,
    /// How long the audit logger keeps draining after its stop signal.
    pub audit_flush_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            sender: SenderConfig::default(),
            audit_queue_capacity: 1_024,
            audit_flush_grace: Duration::from_secs(5),
        }
    }
}

/// Everything the pipeline needs, passed in explicitly at construction.
pub struct Pipeline {
    pub client: Arc<ApiClient>,
    pub store: Arc<StateStore>,
    pub audit_store: Arc<dyn AuditStore>,
    pub interpreter: Arc<dyn MessageInterpreter>,
    pub sessions: Arc<dyn SessionFactory>,
    pub config: PipelineConfig,
}

/// Handle onto a running pipeline.
pub struct PipelineHandle {
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<ShutdownReport>,
}

impl PipelineHandle {
    /// Request the ordered shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the pipeline to finish and collect the shutdown report.
    pub async fn wait(self) -> crate::Result<ShutdownReport> {
        self.task.await.map_err(PipelineError::Join)
    }
}

impl Pipeline {
    /// Verify the credential, replay persisted state, and launch every
    /// component. Cancelling `shutdown` (or a fatal credential failure in
    /// any component) triggers the ordered shutdown; the returned handle
    /// yields the per-phase report.
    pub async fn start(self, shutdown: CancellationToken) -> crate::Result<PipelineHandle> {
        let identity = self
            .client
            .identity()
            .await
            .map_err(PipelineError::from_api)?;
        info!(
            bot_id = identity.id,
            username = identity.username.as_deref().unwrap_or_default(),
            "API credential verified"
        );

        let cursor = match self.store.load_cursor().await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(error = %e, "cursor load failed, starting cold");
                None
            },
        };

        let work_queue: MessageQueue<crate::types::InboundMessage> = MessageQueue::unbounded();
        let outbound_queue: MessageQueue<crate::types::OutboundMessage> =
            MessageQueue::unbounded();
        let audit_queue = MessageQueue::bounded(self.config.audit_queue_capacity);
        let audit_sink = AuditSink::new(audit_queue.clone());
        let outage = OutageFlag::new();

        let poller = {
            let cancel = CancellationToken::new();
            let poller = InboundPoller::new(
                Arc::clone(&self.client),
                work_queue.clone(),
                audit_sink.clone(),
                Arc::clone(&self.store),
                FailureTracker::new(outage.clone()),
                shutdown.clone(),
                cursor,
            );
            ComponentHandle {
                task: tokio::spawn(poller.run(cancel.clone())),
                cancel,
            }
        };

        let sender = {
            let cancel = CancellationToken::new();
            let sender = OutboundSender::new(
                Arc::clone(&self.client),
                outbound_queue.clone(),
                audit_sink.clone(),
                Arc::clone(&self.store),
                outage.clone(),
                FailureTracker::new(outage.clone()),
                shutdown.clone(),
                self.config.sender.clone(),
            );
            ComponentHandle {
                task: tokio::spawn(sender.run(cancel.clone())),
                cancel,
            }
        };

        let audit = {
            let cancel = CancellationToken::new();
            let logger = AuditLogger::new(
                audit_queue.clone(),
                Arc::clone(&self.audit_store),
                self.config.audit_flush_grace,
            );
            ComponentHandle {
                task: tokio::spawn(logger.run(cancel.clone())),
                cancel,
            }
        };

        let mut pool = WorkerPool::new(
            work_queue.clone(),
            outbound_queue.clone(),
            audit_sink,
            Arc::clone(&self.interpreter),
            Arc::clone(&self.sessions),
            self.config.worker.clone(),
        );
        pool.start_worker();

        // The supervisor: scaling loop until shutdown, then the ordered
        // teardown. Its task result is the shutdown report.
        let scale_tick = self.config.worker.scale_tick;
        let supervisor_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(scale_tick);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = supervisor_shutdown.cancelled() => break,
                    _ = tick.tick() => pool.scale_tick().await,
                }
            }

            let coordinator = ShutdownCoordinator {
                poller,
                workers: pool,
                sender,
                audit,
                work_queue,
                outbound_queue,
                audit_queue,
            };
            coordinator.run().await
        });

        info!("pipeline started");
        Ok(PipelineHandle { shutdown, task })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {secrecy::SecretString, tempfile::TempDir};

    use super::*;
    use crate::{
        audit::MemoryAuditStore,
        interpreter::{NullSessionFactory, SessionHandle},
        types::{InboundMessage, OutboundMessage},
    };

    struct NoReplyInterpreter;

    #[async_trait::async_trait]
    impl MessageInterpreter for NoReplyInterpreter {
        async fn interpret(
            &self,
            _message: &InboundMessage,
            _session: &mut SessionHandle,
        ) -> anyhow::Result<Vec<OutboundMessage>> {
            Ok(Vec::new())
        }
    }

    fn pipeline(server: &mockito::Server, tmp: &TempDir) -> Pipeline {
        let token = SecretString::new("1:t".into());
        let client = ApiClient::with_endpoint(&server.url(), &token, Duration::from_secs(1))
            .unwrap();
        Pipeline {
            client: Arc::new(client),
            store: Arc::new(StateStore::new(tmp.path())),
            audit_store: Arc::new(MemoryAuditStore::new()),
            interpreter: Arc::new(NoReplyInterpreter),
            sessions: Arc::new(NullSessionFactory),
            config: PipelineConfig::default(),
        }
    }

    async fn mock_identity(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock("POST", "/bot1:t/getMe")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true, "result": {"id": 1, "username": "bot"}}"#)
            .create_async()
            .await
    }

    async fn mock_empty_updates(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock("POST", "/bot1:t/getUpdates")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true, "result": []}"#)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn invalid_credential_fails_startup() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/bot1:t/getMe")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#)
            .create_async()
            .await;
        let tmp = TempDir::new().unwrap();

        let result = pipeline(&server, &tmp)
            .start(CancellationToken::new())
            .await;
        assert!(matches!(result, Err(PipelineError::Auth(_))));
    }

    #[tokio::test]
    async fn clean_run_reports_all_phases_in_order() {
        let mut server = mockito::Server::new_async().await;
        let _identity = mock_identity(&mut server).await;
        let _updates = mock_empty_updates(&mut server).await;
        let tmp = TempDir::new().unwrap();

        let shutdown = CancellationToken::new();
        let handle = pipeline(&server, &tmp)
            .start(shutdown.clone())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.shutdown();
        let report = tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert!(report.clean());
        let phases: Vec<_> = report.phases.iter().map(|p| p.phase).collect();
        assert_eq!(phases, vec![
            crate::Phase::StopPoller,
            crate::Phase::StopWorkers,
            crate::Phase::StopSender,
            crate::Phase::StopAudit,
            crate::Phase::ReleaseResources,
        ]);
    }
}
