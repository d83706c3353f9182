//! Error type for client operations.

use dynastack_http::{PipelineError, Response, StatusError};
use dynastack_model::MarshalError;

/// Result alias for client operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a client operation or one batch failed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A native value could not be converted to or from the wire format.
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// The request never produced a response.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The service answered with a terminal non-2xx status.
    #[error(transparent)]
    Service(#[from] StatusError),

    /// A response body did not have the expected shape.
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The resubmission cap was reached with entries still unprocessed.
    #[error("{remaining} entries still unprocessed after {resubmissions} resubmissions")]
    UnprocessedRemaining {
        /// Entries the last response reported unprocessed.
        remaining: usize,
        /// Follow-up requests sent.
        resubmissions: u32,
        /// The last response, with its provenance chain.
        response: Box<Response>,
    },

    /// A configuration value could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// The response attached to this error, if it carries one.
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Service(err) => Some(&err.response),
            Self::UnprocessedRemaining { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Returns `true` for connection-level failures.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Pipeline(err) if err.is_transport())
    }
}
