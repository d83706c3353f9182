//! In-memory connector that answers from a script.
//!
//! Used to drive the pool, the pipeline and the batch orchestrator without
//! sockets. Every exchange is recorded with the serial number of the
//! transport that carried it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;

use crate::connector::{Connector, Transport, TransportBody};
use crate::endpoint::Endpoint;
use crate::error::TransportError;

/// What a scripted transport does with one request.
#[derive(Debug, Clone)]
pub enum Step {
    /// Answer with a status and a JSON body.
    Json(u16, serde_json::Value),
    /// Answer with raw parts.
    Raw {
        /// Status code.
        status: u16,
        /// Extra headers.
        headers: Vec<(String, String)>,
        /// Body bytes.
        body: Bytes,
    },
    /// Fail the exchange at the transport level, as an I/O error.
    Fail(String),
    /// Never answer.
    Stall,
    /// Wait, then perform the inner step.
    Delay(Duration, Box<Step>),
}

impl Step {
    /// `200` with `body`.
    #[must_use]
    pub fn ok(body: serde_json::Value) -> Self {
        Self::Json(200, body)
    }

    /// `500` with an internal server error body.
    #[must_use]
    pub fn server_error() -> Self {
        Self::Json(
            500,
            serde_json::json!({
                "__type": "com.amazonaws.dynamodb.v20111205#InternalServerError",
                "message": "internal error"
            }),
        )
    }

    /// `400` with a throughput-exceeded body.
    #[must_use]
    pub fn throttled() -> Self {
        Self::Json(
            400,
            serde_json::json!({
                "__type": "com.amazonaws.dynamodb.v20111205#ProvisionedThroughputExceededException",
                "message": "throughput exceeded"
            }),
        )
    }
}

/// One exchange seen by a scripted transport.
#[derive(Debug, Clone)]
pub struct Recorded {
    /// Serial number of the transport, in order of `open`.
    pub transport: u64,
    /// Endpoint the transport was opened for.
    pub endpoint: Endpoint,
    /// Request headers.
    pub headers: http::HeaderMap,
    /// Request body parsed as JSON (`Null` if it was not JSON).
    pub body: serde_json::Value,
}

impl Recorded {
    /// The `x-amz-target` header value.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.headers.get("x-amz-target").and_then(|v| v.to_str().ok())
    }
}

type Responder = dyn Fn(&Recorded) -> Step + Send + Sync;

/// A [`Connector`] whose transports answer via a responder function.
pub struct ScriptedConnector {
    responder: Arc<Responder>,
    log: Arc<Mutex<Vec<Recorded>>>,
    opened: AtomicU64,
}

impl fmt::Debug for ScriptedConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedConnector")
            .field("opened", &self.opened.load(Ordering::Relaxed))
            .field("recorded", &self.log.lock().len())
            .finish_non_exhaustive()
    }
}

impl ScriptedConnector {
    /// Answer every request with `responder`.
    pub fn new(responder: impl Fn(&Recorded) -> Step + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            log: Arc::new(Mutex::new(Vec::new())),
            opened: AtomicU64::new(0),
        }
    }

    /// Answer requests with `steps` in order; once exhausted, answer `{}`.
    #[must_use]
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        let steps = Mutex::new(steps.into_iter().collect::<VecDeque<_>>());
        Self::new(move |_| {
            steps
                .lock()
                .pop_front()
                .unwrap_or_else(|| Step::ok(serde_json::json!({})))
        })
    }

    /// Number of transports opened so far.
    #[must_use]
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Every exchange so far, in arrival order.
    #[must_use]
    pub fn recorded(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, endpoint: &Endpoint) -> Box<dyn Transport> {
        let serial = self.opened.fetch_add(1, Ordering::Relaxed);
        Box::new(ScriptedTransport {
            serial,
            endpoint: endpoint.clone(),
            responder: Arc::clone(&self.responder),
            log: Arc::clone(&self.log),
        })
    }
}

struct ScriptedTransport {
    serial: u64,
    endpoint: Endpoint,
    responder: Arc<Responder>,
    log: Arc<Mutex<Vec<Recorded>>>,
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("serial", &self.serial)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &mut self,
        request: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<TransportBody>, TransportError> {
        let (parts, body) = request.into_parts();
        let bytes = body
            .collect()
            .await
            .unwrap_or_else(|never| match never {})
            .to_bytes();
        let recorded = Recorded {
            transport: self.serial,
            endpoint: self.endpoint.clone(),
            headers: parts.headers,
            body: serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null),
        };
        let step = (self.responder)(&recorded);
        self.log.lock().push(recorded);
        perform(step).await
    }
}

async fn perform(mut step: Step) -> Result<http::Response<TransportBody>, TransportError> {
    loop {
        match step {
            Step::Delay(delay, inner) => {
                tokio::time::sleep(delay).await;
                step = *inner;
            }
            Step::Stall => std::future::pending::<()>().await,
            Step::Fail(reason) => return Err(std::io::Error::other(reason).into()),
            Step::Json(status, body) => {
                return respond(status, Vec::new(), Bytes::from(body.to_string()));
            }
            Step::Raw {
                status,
                headers,
                body,
            } => return respond(status, headers, body),
        }
    }
}

fn respond(
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
) -> Result<http::Response<TransportBody>, TransportError> {
    let mut builder = http::Response::builder()
        .status(status)
        .header("content-type", "application/x-amz-json-1.0");
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
        .body(
            Full::new(body)
                .map_err(|never| -> TransportError { match never {} })
                .boxed_unsync(),
        )
        .map_err(|err| std::io::Error::other(err).into())
}
