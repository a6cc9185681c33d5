//! Ordered multi-phase shutdown across the whole pipeline.
//!
//! No phase starts before the previous one completes. Ingestion stops
//! first so no new work enters while workers tear down; workers drain
//! before the sender so it sees their final burst; the sender stops before
//! the audit logger so every delivery outcome is still logged.

use {
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info},
};

use crate::{
    audit::AuditRecord,
    queue::MessageQueue,
    types::{InboundMessage, OutboundMessage},
    workers::WorkerPool,
};

/// The five shutdown phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    StopPoller,
    StopWorkers,
    StopSender,
    StopAudit,
    ReleaseResources,
}

#[derive(Debug)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub error: Option<String>,
}

impl PhaseOutcome {
    fn completed(phase: Phase) -> Self {
        Self { phase, error: None }
    }

    fn failed(phase: Phase, error: String) -> Self {
        Self {
            phase,
            error: Some(error),
        }
    }
}

/// What happened during shutdown, phase by phase, in order.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub phases: Vec<PhaseOutcome>,
}

impl ShutdownReport {
    /// True when every phase completed without error.
    pub fn clean(&self) -> bool {
        self.phases.iter().all(|p| p.error.is_none())
    }

    /// Errors surfaced by components while stopping (e.g. a fatal
    /// credential rejection that triggered the shutdown).
    pub fn errors(&self) -> Vec<(Phase, &str)> {
        self.phases
            .iter()
            .filter_map(|p| p.error.as_deref().map(|e| (p.phase, e)))
            .collect()
    }
}

/// A stoppable component: its private stop signal plus the task whose
/// completion is the "done" acknowledgment.
pub(crate) struct ComponentHandle {
    pub cancel: CancellationToken,
    pub task: JoinHandle<crate::Result<()>>,
}

impl ComponentHandle {
    async fn stop(self, phase: Phase) -> PhaseOutcome {
        self.cancel.cancel();
        match self.task.await {
            Ok(Ok(())) => PhaseOutcome::completed(phase),
            Ok(Err(e)) => PhaseOutcome::failed(phase, e.to_string()),
            Err(e) => PhaseOutcome::failed(phase, format!("task join failed: {e}")),
        }
    }
}

pub(crate) struct ShutdownCoordinator {
    pub poller: ComponentHandle,
    pub workers: WorkerPool,
    pub sender: ComponentHandle,
    pub audit: ComponentHandle,
    pub work_queue: MessageQueue<InboundMessage>,
    pub outbound_queue: MessageQueue<OutboundMessage>,
    pub audit_queue: MessageQueue<AuditRecord>,
}

impl ShutdownCoordinator {
    pub async fn run(mut self) -> ShutdownReport {
        info!("pipeline shutdown started");
        let mut report = ShutdownReport::default();

        // 1. Stop ingestion; the poller acknowledges once the work queue
        //    has drained and the cursor is persisted.
        report.phases.push(self.poller.stop(Phase::StopPoller).await);

        // 2. Signal every worker and join each in turn.
        self.workers.shutdown_all().await;
        report.phases.push(PhaseOutcome::completed(Phase::StopWorkers));

        // 3. The sender finishes any in-flight attempt and persists the
        //    remainder.
        report.phases.push(self.sender.stop(Phase::StopSender).await);

        // 4. The audit logger flushes its queue.
        report.phases.push(self.audit.stop(Phase::StopAudit).await);

        // 5. Drop the shared queue handles.
        drop(self.work_queue);
        drop(self.outbound_queue);
        drop(self.audit_queue);
        debug!("shared pipeline resources released");
        report
            .phases
            .push(PhaseOutcome::completed(Phase::ReleaseResources));

        for (phase, e) in report.errors() {
            error!(phase = ?phase, error = e, "component stopped with error");
        }
        info!(clean = report.clean(), "pipeline shutdown complete");
        report
    }
}
