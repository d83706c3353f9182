//! Response value produced by the pipeline.

use dynastack_model::{Marshaller, MarshalError, ServiceError, Value};

use crate::error::StatusError;
use crate::request::RequestState;

/// Normalized response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseBody {
    /// No payload.
    #[default]
    Empty,
    /// A payload that was not JSON.
    Raw(bytes::Bytes),
    /// A parsed JSON payload.
    Json(serde_json::Value),
}

impl ResponseBody {
    /// Normalize a drained payload: empty stays empty, JSON is parsed,
    /// anything else is kept raw.
    #[must_use]
    pub fn from_bytes(bytes: bytes::Bytes) -> Self {
        if bytes.is_empty() {
            return Self::Empty;
        }
        match serde_json::from_slice(&bytes) {
            Ok(json) => Self::Json(json),
            Err(_) => Self::Raw(bytes),
        }
    }
}

/// Terminal outcome of one pipeline execution.
#[derive(Clone)]
pub struct Response {
    /// HTTP status.
    pub status: http::StatusCode,
    /// Response headers.
    pub headers: http::HeaderMap,
    /// Drained body.
    pub body: ResponseBody,
    /// Retries the pipeline performed before this response.
    pub retries: u32,
    /// Caller state carried over from the request.
    pub state: Option<RequestState>,
    /// Earlier partial responses in a resubmission chain, oldest first.
    pub chain: Vec<Response>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("body", &self.body)
            .field("retries", &self.retries)
            .field("chain", &self.chain.len())
            .finish_non_exhaustive()
    }
}

impl Response {
    /// A response with the given status and body and nothing else.
    #[must_use]
    pub fn new(status: http::StatusCode, body: ResponseBody) -> Self {
        Self {
            status,
            headers: http::HeaderMap::new(),
            body,
            retries: 0,
            state: None,
            chain: Vec::new(),
        }
    }

    /// 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The body as JSON, if it parsed.
    #[must_use]
    pub fn json(&self) -> Option<&serde_json::Value> {
        match &self.body {
            ResponseBody::Json(json) => Some(json),
            _ => None,
        }
    }

    /// The service error declared by the body's `__type`, if any.
    #[must_use]
    pub fn service_error(&self) -> Option<ServiceError> {
        self.json().and_then(ServiceError::from_json)
    }

    /// 500, or 400 declaring throughput exceeded.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.status.as_u16() {
            500 => true,
            400 => self
                .service_error()
                .is_some_and(|error| error.is_throughput_exceeded()),
            _ => false,
        }
    }

    /// The body in native form, using the default response value keys.
    pub fn native_body(&self) -> Result<Value, MarshalError> {
        self.native_body_with(&Marshaller::default())
    }

    /// The body in native form, using `marshaller`. Non-JSON bodies map to
    /// [`Value::Null`].
    pub fn native_body_with(&self, marshaller: &Marshaller) -> Result<Value, MarshalError> {
        match self.json() {
            Some(json) => marshaller.from_wire(json),
            None => Ok(Value::Null),
        }
    }

    /// Caller state, downcast to `T`.
    #[must_use]
    pub fn state<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.state.as_deref().and_then(|s| s.downcast_ref::<T>())
    }

    /// Raise any non-2xx response as a [`StatusError`].
    pub fn error_for_status(self) -> Result<Self, StatusError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(StatusError {
            error: self.service_error(),
            response: Box::new(self),
        })
    }
}
