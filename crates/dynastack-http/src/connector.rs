//! Transport seam.
//!
//! A [`Connector`] builds one [`Transport`] per pooled handle. The transport
//! owns a single connection and performs at most one exchange at a time,
//! which `&mut self` on [`Transport::send`] enforces.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::endpoint::{Endpoint, Scheme};
use crate::error::TransportError;

/// Body of a response as returned by a transport, before draining.
pub type TransportBody = UnsyncBoxBody<Bytes, TransportError>;

/// One connection to one endpoint.
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Perform one HTTP exchange.
    async fn send(
        &mut self,
        request: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<TransportBody>, TransportError>;
}

/// Factory for transports.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Create a transport bound to `endpoint`.
    ///
    /// Construction is synchronous; the connection itself is made on the
    /// first exchange.
    fn open(&self, endpoint: &Endpoint) -> Box<dyn Transport>;
}

/// Connector for plain HTTP/1.1 over TCP using hyper.
///
/// TLS endpoints need a connector that wraps the stream before the
/// handshake; this one rejects them.
#[derive(Debug, Clone)]
pub struct HyperConnector {
    connect_timeout: Duration,
}

impl HyperConnector {
    /// Create a connector with the given connect timeout.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for HyperConnector {
    fn open(&self, endpoint: &Endpoint) -> Box<dyn Transport> {
        Box::new(HyperTransport {
            endpoint: endpoint.clone(),
            connect_timeout: self.connect_timeout,
            sender: None,
            driver: None,
        })
    }
}

/// A lazily connected hyper HTTP/1 client connection.
pub struct HyperTransport {
    endpoint: Endpoint,
    connect_timeout: Duration,
    sender: Option<http1::SendRequest<Full<Bytes>>>,
    driver: Option<JoinHandle<()>>,
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.sender.is_some())
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.endpoint.scheme != Scheme::Http {
            return Err(TransportError::UnsupportedScheme(
                self.endpoint.scheme.as_str().to_owned(),
            ));
        }
        let address = (self.endpoint.host.as_str(), self.endpoint.port);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                endpoint: self.endpoint.to_string(),
                timeout: self.connect_timeout,
            })??;
        stream.set_nodelay(true)?;

        let (sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
        let endpoint = self.endpoint.to_string();
        // The connection future drives the socket; it ends when the sender
        // is dropped or the peer closes.
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(endpoint, %err, "connection closed with error");
            }
        });
        if let Some(old) = self.driver.replace(driver) {
            old.abort();
        }
        self.sender = Some(sender);
        debug!(endpoint = %self.endpoint, "connected");
        Ok(())
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(
        &mut self,
        request: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<TransportBody>, TransportError> {
        if self.sender.as_ref().is_none_or(http1::SendRequest::is_closed) {
            self.connect().await?;
        }
        let Some(sender) = self.sender.as_mut() else {
            return Err(TransportError::UnsupportedScheme(
                self.endpoint.scheme.as_str().to_owned(),
            ));
        };
        sender.ready().await?;
        let response = sender.send_request(request).await?;
        Ok(response.map(|body| body.map_err(TransportError::from).boxed_unsync()))
    }
}

impl Drop for HyperTransport {
    fn drop(&mut self) {
        self.sender = None;
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}
