use serde::{Deserialize, Serialize};

/// The JSON envelope every API endpoint answers with.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error_code: Option<i64>,
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

/// Extra failure metadata some endpoints attach to the envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

/// One element of a long-poll fetch: the strictly increasing sequence
/// number plus whatever payload the service attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUpdate {
    pub update_id: i64,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Result of the identity check performed at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_update_keeps_unknown_payload_fields() {
        let raw: RawUpdate = serde_json::from_str(
            r#"{"update_id": 42, "message": {"text": "hi", "chat": {"id": 7}}}"#,
        )
        .unwrap();
        assert_eq!(raw.update_id, 42);
        assert_eq!(raw.payload["message"]["text"], "hi");
    }

    #[test]
    fn error_envelope_deserializes() {
        let env: Envelope<serde_json::Value> = serde_json::from_str(
            r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#,
        )
        .unwrap();
        assert!(!env.ok);
        assert_eq!(env.error_code, Some(401));
        assert!(env.result.is_none());
    }

    #[test]
    fn identity_tolerates_missing_username() {
        let identity: BotIdentity = serde_json::from_str(r#"{"id": 99}"#).unwrap();
        assert_eq!(identity.id, 99);
        assert!(identity.username.is_none());
    }
}
