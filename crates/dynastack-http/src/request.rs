//! Request value passed through the pipeline.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dynastack_model::{CONTENT_TYPE, Operation};

use crate::endpoint::Endpoint;

/// Opaque caller state carried from a request to its response.
pub type RequestState = Arc<dyn Any + Send + Sync>;

/// Retry bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Retries performed so far.
    pub attempts: u32,
    /// Maximum retries; `None` retries until a non-retryable outcome.
    pub max_retries: Option<u32>,
    /// Delay to observe before the next dispatch.
    pub pending_delay: Option<Duration>,
}

impl RetryState {
    /// Whether another retry is allowed.
    #[must_use]
    pub fn may_retry(&self) -> bool {
        self.max_retries.is_none_or(|max| self.attempts < max)
    }
}

/// A built request ready for the pipeline.
///
/// The pipeline never mutates a request in place; each retry produces a new
/// value through [`Request::retried`].
#[derive(Clone)]
pub struct Request {
    /// HTTP method.
    pub method: http::Method,
    /// Where to send it.
    pub endpoint: Endpoint,
    /// Request path.
    pub path: String,
    /// Extra headers. `host` is derived from the endpoint.
    pub headers: BTreeMap<String, String>,
    /// Wire-form JSON body.
    pub body: serde_json::Value,
    /// Retry bookkeeping.
    pub retry: RetryState,
    /// Caller state attached to the eventual response.
    pub state: Option<RequestState>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("endpoint", &self.endpoint)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("retry", &self.retry)
            .field("state", &self.state.is_some())
            .finish()
    }
}

impl Request {
    /// A `POST /` request for `operation` with a wire-form body.
    #[must_use]
    pub fn for_operation(
        endpoint: Endpoint,
        operation: Operation,
        body: serde_json::Value,
    ) -> Self {
        let headers = BTreeMap::from([
            ("content-type".to_owned(), CONTENT_TYPE.to_owned()),
            ("x-amz-target".to_owned(), operation.target()),
        ]);
        Self {
            method: http::Method::POST,
            endpoint,
            path: "/".to_owned(),
            headers,
            body,
            retry: RetryState::default(),
            state: None,
        }
    }

    /// Cap the number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Attach caller state, returned on the response.
    #[must_use]
    pub fn with_state(mut self, state: RequestState) -> Self {
        self.state = Some(state);
        self
    }

    /// The `x-amz-target` header, if set.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.headers.get("x-amz-target").map(String::as_str)
    }

    /// The same request scheduled for another attempt after `delay`.
    #[must_use]
    pub fn retried(&self, delay: Duration) -> Self {
        let mut next = self.clone();
        next.retry.attempts += 1;
        next.retry.pending_delay = Some(delay);
        next
    }
}
