//! Retrying request pipeline.
//!
//! One execution walks `delay -> dispatch -> classify` in a loop. A
//! retryable response (500, or 400 declaring throughput exceeded) schedules
//! another attempt after `2^n * 50` backoff units until the retry cap is
//! reached; everything else, errors included, is returned as the terminal
//! response. Transport failures invalidate the loaned handle and end the
//! execution with an error.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dynastack_auth::SigV4Signer;
use http_body_util::Full;
use tracing::{debug, warn};

use crate::body::drain;
use crate::error::{PipelineError, TransportError};
use crate::pool::PoolManager;
use crate::request::Request;
use crate::response::{Response, ResponseBody};

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Length of one backoff unit.
    pub backoff_unit: Duration,
    /// Upper bound on one exchange, body drain included.
    pub exchange_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backoff_unit: Duration::from_millis(1),
            exchange_timeout: Duration::from_secs(60),
        }
    }
}

/// Backoff before retry number `attempts + 1`, in units: `2^attempts * 50`.
#[must_use]
pub fn backoff_units(attempts: u32) -> u64 {
    2_u64.saturating_pow(attempts).saturating_mul(50)
}

/// [`backoff_units`] scaled by `unit`.
#[must_use]
pub fn backoff_delay(attempts: u32, unit: Duration) -> Duration {
    let units = u32::try_from(backoff_units(attempts)).unwrap_or(u32::MAX);
    unit.saturating_mul(units)
}

enum Exchange {
    Done(Result<(http::response::Parts, ResponseBody), TransportError>),
    Cancelled,
}

/// Executes requests against pooled transports with retry and backoff.
#[derive(Debug, Clone)]
pub struct RequestPipeline {
    pool: Arc<PoolManager>,
    signer: Option<SigV4Signer>,
    config: PipelineConfig,
}

impl RequestPipeline {
    /// Pipeline over `pool`, sending unsigned requests.
    #[must_use]
    pub fn new(pool: Arc<PoolManager>, config: PipelineConfig) -> Self {
        Self {
            pool,
            signer: None,
            config,
        }
    }

    /// Sign every attempt with `signer`.
    #[must_use]
    pub fn with_signer(mut self, signer: SigV4Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    /// The shared pool manager.
    #[must_use]
    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    /// The pipeline configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute `request` until a terminal response.
    pub async fn execute(&self, request: Request) -> Result<Response, PipelineError> {
        self.execute_until(request, std::future::pending()).await
    }

    /// Execute `request`, giving up when `cancel` resolves.
    ///
    /// A handle on loan at cancellation time is invalidated.
    pub async fn execute_until<C>(
        &self,
        mut request: Request,
        cancel: C,
    ) -> Result<Response, PipelineError>
    where
        C: Future<Output = ()> + Send,
    {
        let mut cancel = pin!(cancel);
        loop {
            if let Some(delay) = request.retry.pending_delay {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = &mut cancel => return Err(PipelineError::Cancelled),
                }
            }

            let http_request = self.build(&request)?;
            let mut handle = tokio::select! {
                handle = self.pool.acquire(&request.endpoint) => handle?,
                () = &mut cancel => return Err(PipelineError::Cancelled),
            };

            let timeout = self.config.exchange_timeout;
            let outcome = {
                let handle = &mut handle;
                let exchange = async move {
                    let response = handle.send(http_request).await?;
                    let (parts, body) = response.into_parts();
                    let body = drain(&parts.headers, body).await?;
                    Ok::<_, TransportError>((parts, body))
                };
                tokio::select! {
                    result = tokio::time::timeout(timeout, exchange) => {
                        Exchange::Done(result.unwrap_or(Err(TransportError::Timeout(timeout))))
                    }
                    () = &mut cancel => Exchange::Cancelled,
                }
            };

            let (parts, body) = match outcome {
                Exchange::Done(Ok(received)) => {
                    handle.release();
                    received
                }
                Exchange::Done(Err(err)) => {
                    debug!(endpoint = %request.endpoint, %err, "exchange failed");
                    handle.invalidate();
                    return Err(err.into());
                }
                Exchange::Cancelled => {
                    handle.invalidate();
                    return Err(PipelineError::Cancelled);
                }
            };

            let response = Response {
                status: parts.status,
                headers: parts.headers,
                body,
                retries: request.retry.attempts,
                state: request.state.clone(),
                chain: Vec::new(),
            };

            if response.is_retryable() && request.retry.may_retry() {
                let delay = backoff_delay(request.retry.attempts, self.config.backoff_unit);
                warn!(
                    operation = request.target().unwrap_or_default(),
                    attempt = request.retry.attempts + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    status = response.status.as_u16(),
                    "retrying request"
                );
                request = request.retried(delay);
                continue;
            }
            return Ok(response);
        }
    }

    /// Turn the request value into a signed HTTP request for one attempt.
    fn build(&self, request: &Request) -> Result<http::Request<Full<Bytes>>, PipelineError> {
        let payload = Bytes::from(serde_json::to_vec(&request.body)?);
        let mut builder = http::Request::builder()
            .method(request.method.clone())
            .uri(request.path.as_str())
            .header(http::header::HOST, request.endpoint.authority());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let mut http_request = builder.body(payload)?;
        if let Some(signer) = &self.signer {
            http_request = signer.sign(http_request)?;
        }
        Ok(http_request.map(Full::new))
    }
}
