//! Trait seams to the external collaborators: the per-user message
//! interpreter and the relational session store behind it.

use async_trait::async_trait;

use crate::types::{InboundMessage, OutboundMessage};

/// Opaque per-invocation handle to the session store. The concrete
/// interpreter downcasts it to whatever its store implementation hands out.
pub type SessionHandle = Box<dyn std::any::Any + Send>;

/// Factory for session handles. Each worker owns its own factory-provided
/// connection; connections are never shared between workers.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a fresh session handle for one interpreter invocation.
    async fn open(&self) -> anyhow::Result<SessionHandle>;

    /// No-op liveness probe issued by long-idle workers so the store does
    /// not tear down their connection. Not a correctness requirement.
    async fn keep_alive(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Turns one inbound message into zero or more outbound replies.
///
/// Pure from the pipeline's point of view: failures are absorbed per
/// message and never stop the worker loop.
#[async_trait]
pub trait MessageInterpreter: Send + Sync {
    async fn interpret(
        &self,
        message: &InboundMessage,
        session: &mut SessionHandle,
    ) -> anyhow::Result<Vec<OutboundMessage>>;
}

/// Session factory with no backing store. Used by tests and by deployments
/// whose interpreter keeps no per-user state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSessionFactory;

#[async_trait]
impl SessionFactory for NullSessionFactory {
    async fn open(&self) -> anyhow::Result<SessionHandle> {
        Ok(Box::new(()))
    }
}
