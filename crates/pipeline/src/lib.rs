//! The inbound/outbound delivery pipeline and its worker-pool supervisor.
//!
//! Data flow: external API → [`poller::InboundPoller`] → work queue →
//! [`workers::WorkerPool`] (→ [`interpreter::MessageInterpreter`]) →
//! outbound queue → [`sender::OutboundSender`] → external API. Every
//! component also feeds the audit queue drained by [`audit::AuditLogger`],
//! and all shutdown signalling runs through [`shutdown::ShutdownCoordinator`].

pub mod audit;
pub mod error;
pub mod health;
pub mod interpreter;
pub mod pipeline;
pub mod poller;
pub mod queue;
pub mod sender;
pub mod shutdown;
pub mod store;
pub mod types;
pub mod workers;

pub use {
    audit::{AuditLogger, AuditRecord, AuditSink, AuditStore, FileAuditStore, MemoryAuditStore},
    error::{PipelineError, Result},
    health::{FailureTracker, HealthState, OutageFlag},
    interpreter::{MessageInterpreter, NullSessionFactory, SessionFactory, SessionHandle},
    pipeline::{Pipeline, PipelineConfig, PipelineHandle},
    queue::MessageQueue,
    shutdown::{Phase, PhaseOutcome, ShutdownReport},
    store::StateStore,
    types::{Direction, InboundMessage, OutboundMessage, SeqId},
};
