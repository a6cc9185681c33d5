use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The credential was rejected. Fatal: the pipeline halts on this.
    #[error("API credential rejected: {description}")]
    Auth { description: String },

    /// The API is throttling us. Retried on the caller's natural cadence.
    #[error("rate limited by the API")]
    RateLimited { retry_after: Option<Duration> },

    /// The API rejected the request itself. Retrying would repeat the same
    /// malformed request, so callers drop the message instead.
    #[error("request rejected by the API ({code}): {description}")]
    Client { code: i64, description: String },

    /// The API answered with a server-side failure.
    #[error("API server error (status {status})")]
    Server { status: u16 },

    /// The request never completed (timeout, DNS, TLS, connection reset).
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not the expected envelope.
    #[error("malformed API response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    /// Fatal errors halt the pipeline and surface to the operator.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Transient errors drive the consecutive-failure counter.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Server { .. } | Self::Transport(_) | Self::Decode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
