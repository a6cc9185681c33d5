use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The API rejected the credential. The whole pipeline halts on this;
    /// every other API failure is absorbed and classified locally.
    #[error("{0}")]
    Auth(#[source] courier_api::Error),

    #[error(transparent)]
    Api(#[from] courier_api::Error),

    #[error("task join failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Wrap an API error, promoting fatal ones to [`PipelineError::Auth`].
    pub fn from_api(e: courier_api::Error) -> Self {
        if e.is_fatal() {
            Self::Auth(e)
        } else {
            Self::Api(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
