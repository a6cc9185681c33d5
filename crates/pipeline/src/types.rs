use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use courier_api::RawUpdate;

/// External sequence number, strictly increasing, issued by the API.
pub type SeqId = i64;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One message fetched from the API. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub seq: SeqId,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub received_at_ms: u64,
}

impl InboundMessage {
    pub fn from_update(update: RawUpdate) -> Self {
        Self {
            seq: update.update_id,
            payload: update.payload,
            received_at_ms: now_ms(),
        }
    }

    /// Message text, when the payload carries a chat message.
    pub fn text(&self) -> Option<&str> {
        self.payload.get("message")?.get("text")?.as_str()
    }

    /// Originating chat id, when the payload carries a chat message.
    pub fn chat_id(&self) -> Option<String> {
        let id = self.payload.get("message")?.get("chat")?.get("id")?;
        match id {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// One reply on its way back to the API.
///
/// The attempt counter is touched only by the sender; everything else is
/// fixed at creation by the worker that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub destination: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<serde_json::Value>,
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at_ms: u64,
}

impl OutboundMessage {
    pub fn text(destination: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            text: text.into(),
            reply_markup: None,
            attempts: 0,
            enqueued_at_ms: now_ms(),
        }
    }

    #[must_use]
    pub fn with_reply_markup(mut self, markup: serde_json::Value) -> Self {
        self.reply_markup = Some(markup);
        self
    }
}

/// Which way a message was travelling when it was audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
    /// Outbound message the API refused; dropped after auditing.
    Rejected,
}
