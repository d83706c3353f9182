//! Error types for the transport, the pool and the pipeline.

use std::time::Duration;

use dynastack_auth::AuthError;
use dynastack_model::ServiceError;

use crate::response::Response;

/// Connection-level failures. A handle that produced one is invalidated.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connecting did not finish within the connect timeout.
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Endpoint being connected to.
        endpoint: String,
        /// Configured connect timeout.
        timeout: Duration,
    },

    /// The exchange did not finish within the exchange timeout.
    #[error("exchange timed out after {0:?}")]
    Timeout(Duration),

    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP protocol error from the client connection.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Response body did not match its `x-amz-crc32` header.
    #[error("response checksum mismatch: expected {expected}, computed {actual}")]
    Checksum {
        /// Value of the header.
        expected: u32,
        /// CRC32 of the received body.
        actual: u32,
    },

    /// The connector cannot open this kind of endpoint.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The handle's transport was already returned to its pool.
    #[error("handle has no transport")]
    Detached,
}

/// Failures to obtain a handle from the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Every handle for the endpoint stayed on loan for the whole wait.
    #[error("no handle for {endpoint} became available within {waited:?}")]
    AcquireTimeout {
        /// Endpoint the handle was requested for.
        endpoint: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The pool was closed while waiting.
    #[error("pool for {0} is closed")]
    Closed(String),
}

/// Why a request execution ended without a response.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Connection-level failure; not retried here.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No handle could be obtained.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Signing failed.
    #[error("failed to sign request: {0}")]
    Sign(#[from] AuthError),

    /// The request body could not be encoded.
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    /// The request could not be turned into an HTTP request.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    /// The caller cancelled the execution.
    #[error("request cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Returns `true` for connection-level failures, including timeouts.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// A terminal non-2xx response, raised by [`Response::error_for_status`].
#[derive(Debug, thiserror::Error)]
#[error("service returned HTTP {}", status_detail(.response, .error))]
pub struct StatusError {
    /// Service error parsed from the body, if it had a `__type`.
    #[source]
    pub error: Option<ServiceError>,
    /// The full response, including retries and provenance.
    pub response: Box<Response>,
}

#[allow(clippy::ref_option)]
fn status_detail(response: &Response, error: &Option<ServiceError>) -> String {
    let mut detail = response.status.as_u16().to_string();
    if let Some(error) = error {
        detail.push_str(&format!(": {error}"));
    }
    if response.retries > 0 {
        detail.push_str(&format!(" after {} retries", response.retries));
    }
    detail
}
