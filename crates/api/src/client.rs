use std::time::Duration;

use {
    secrecy::{ExposeSecret, SecretString},
    serde::de::DeserializeOwned,
    serde_json::json,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    types::{BotIdentity, Envelope, RawUpdate},
};

/// Default API host. Every call goes to `{endpoint}/bot{token}/{method}`.
pub const DEFAULT_ENDPOINT: &str = "https://api.telegram.org";

/// Extra headroom on the HTTP client timeout so the client does not abort a
/// long-poll request before the server answers it.
const CLIENT_TIMEOUT_PAD: Duration = Duration::from_secs(15);

/// Client for the bot messaging API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    poll_timeout: Duration,
}

impl ApiClient {
    /// Build a client against the default endpoint.
    pub fn new(token: &SecretString, poll_timeout: Duration) -> Result<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT, token, poll_timeout)
    }

    /// Build a client against a custom endpoint (tests point this at a mock
    /// server).
    pub fn with_endpoint(
        endpoint: &str,
        token: &SecretString,
        poll_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("courier/", env!("CARGO_PKG_VERSION")))
            .timeout(poll_timeout + CLIENT_TIMEOUT_PAD)
            .build()?;
        Ok(Self {
            http,
            base_url: format!(
                "{}/bot{}",
                endpoint.trim_end_matches('/'),
                token.expose_secret()
            ),
            poll_timeout,
        })
    }

    /// Verify the credential and fetch the bot identity.
    pub async fn identity(&self) -> Result<BotIdentity> {
        self.call("getMe", json!({})).await
    }

    /// Long-poll for new updates starting at `offset`. The call itself blocks
    /// server-side for up to the configured poll timeout when no data is
    /// available. Passing no offset lets the service choose a starting point.
    pub async fn poll_updates(&self, offset: Option<i64>) -> Result<Vec<RawUpdate>> {
        let mut body = json!({ "timeout": self.poll_timeout.as_secs() });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        let updates: Vec<RawUpdate> = self.call("getUpdates", body).await?;
        debug!(count = updates.len(), "long poll returned");
        Ok(updates)
    }

    /// Deliver one message. Callers chunk text longer than
    /// [`crate::MAX_MESSAGE_LEN`] before enqueueing, so no length check
    /// happens here.
    pub async fn send_message(
        &self,
        destination: &str,
        text: &str,
        reply_markup: Option<&serde_json::Value>,
    ) -> Result<()> {
        let mut body = json!({ "chat_id": destination, "text": text });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup.clone();
        }
        let _: serde_json::Value = self.call("sendMessage", body).await?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        let envelope: Envelope<T> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Gateways and proxies answer outages with non-envelope
                // bodies; classify those by HTTP status.
                if status.is_server_error() {
                    return Err(Error::Server {
                        status: status.as_u16(),
                    });
                }
                return Err(Error::Decode(e));
            },
        };

        if envelope.ok {
            return envelope.result.ok_or_else(|| {
                Error::Decode(<serde_json::Error as serde::de::Error>::custom(
                    "envelope ok but result missing",
                ))
            });
        }

        let retry_after = envelope
            .parameters
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs);
        Err(classify_failure(
            status.as_u16(),
            envelope.error_code,
            envelope.description,
            retry_after,
        ))
    }
}

/// Map an error envelope to the failure taxonomy. The envelope's own
/// `error_code` wins over the HTTP status when both are present.
fn classify_failure(
    status: u16,
    error_code: Option<i64>,
    description: Option<String>,
    retry_after: Option<Duration>,
) -> Error {
    let code = error_code.unwrap_or_else(|| i64::from(status));
    let description = description.unwrap_or_else(|| "no description".to_string());
    match code {
        401 => Error::Auth { description },
        429 => Error::RateLimited { retry_after },
        _ if status >= 500 || code >= 500 => Error::Server { status },
        _ => Error::Client { code, description },
    }
}
