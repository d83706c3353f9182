//! End-to-end tests for the dynastack client.
//!
//! Each test starts its own [`FakeDynamo`] on an ephemeral local port and
//! drives a real [`DynamoClient`] against it over TCP, so the pool, the
//! hyper connector, signing, checksums and the batch chain all run for real.
//!
//! Run them with:
//! ```text
//! cargo test -p dynastack-integration
//! ```

use std::sync::Once;
use std::time::Duration;

use dynastack_core::{ClientConfig, DynamoClient};
use dynastack_model::types::{KeySchema, KeySchemaElement, ScalarAttributeType};

mod server;

pub use server::{FakeDynamo, Fault};

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Client configuration pointing at `server`, with timings short enough
/// for tests.
#[must_use]
pub fn client_config(server: &FakeDynamo) -> ClientConfig {
    init_tracing();

    let mut config = ClientConfig::for_endpoint(server.endpoint());
    config.connect_timeout = Duration::from_secs(2);
    config.pipeline.exchange_timeout = Duration::from_secs(5);
    config.pipeline.backoff_unit = Duration::from_millis(1);
    config
}

/// Create a client talking to `server`.
#[must_use]
pub fn client(server: &FakeDynamo) -> DynamoClient {
    DynamoClient::new(client_config(server)).unwrap()
}

/// Generate a unique table name for a test.
#[must_use]
pub fn test_table_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("test-{prefix}-{id}")
}

/// Schema with a string hash key named `id`.
#[must_use]
pub fn hash_schema() -> KeySchema {
    KeySchema {
        hash_key_element: KeySchemaElement {
            attribute_name: "id".to_owned(),
            attribute_type: ScalarAttributeType::S,
        },
        range_key_element: None,
    }
}

/// Schema with a string hash key `stream` and a number range key `seq`.
#[must_use]
pub fn composite_schema() -> KeySchema {
    KeySchema {
        hash_key_element: KeySchemaElement {
            attribute_name: "stream".to_owned(),
            attribute_type: ScalarAttributeType::S,
        },
        range_key_element: Some(KeySchemaElement {
            attribute_name: "seq".to_owned(),
            attribute_type: ScalarAttributeType::N,
        }),
    }
}

mod test_batch;
mod test_client;
