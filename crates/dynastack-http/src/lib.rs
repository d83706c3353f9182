//! HTTP execution layer for dynastack.
//!
//! - **Connector**: the transport seam, with a hyper HTTP/1 implementation
//! - **Pool**: per-endpoint handle pools with idle eviction
//! - **Pipeline**: delay, dispatch, classify and retry with backoff
//! - **Request/Response**: immutable values passed through the pipeline

pub mod body;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod request;
pub mod response;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

pub use connector::{Connector, HyperConnector, Transport, TransportBody};
pub use endpoint::{Endpoint, InvalidEndpoint, Scheme};
pub use error::{PipelineError, PoolError, StatusError, TransportError};
pub use pipeline::{PipelineConfig, RequestPipeline, backoff_delay, backoff_units};
pub use pool::{HandleId, PoolConfig, PoolManager, PoolStats, PooledHandle};
pub use request::{Request, RequestState, RetryState};
pub use response::{Response, ResponseBody};
