//! Built-in demo interpreter: echoes every chat message back to its chat.
//!
//! Real deployments swap this for their own [`MessageInterpreter`]
//! implementation backed by a session store.

use async_trait::async_trait;

use courier_pipeline::{InboundMessage, MessageInterpreter, OutboundMessage, SessionHandle};

pub struct EchoInterpreter;

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
