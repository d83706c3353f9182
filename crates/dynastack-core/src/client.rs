//! Client facade.

use std::sync::Arc;

use dynastack_auth::SigV4Signer;
use dynastack_http::{Connector, Endpoint, HyperConnector, PoolManager, RequestPipeline, Response};
use dynastack_model::types::{KeySchema, ProvisionedThroughput, TableDescription};
use dynastack_model::{Item, ItemKey, Value};
use tracing::info;

use crate::batch::{BatchGetResult, BatchOrchestrator, BatchOutcome, WriteEntry};
use crate::builders::{self, NativeRequest};
use crate::config::ClientConfig;
use crate::error::Result;

/// DynamoDB client over one shared pool manager.
///
/// Single-item and table methods raise non-2xx responses as
/// [`Error::Service`](crate::Error::Service). Batch methods report per
/// batch instead.
#[derive(Debug, Clone)]
pub struct DynamoClient {
    pool: Arc<PoolManager>,
    pipeline: RequestPipeline,
    batch: BatchOrchestrator,
    endpoint: Endpoint,
    max_retries: Option<u32>,
}

impl DynamoClient {
    /// Client using plain HTTP/1 connections.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let connector = Arc::new(HyperConnector::new(config.connect_timeout));
        Self::with_connector(config, connector)
    }

    /// Client opening transports with `connector`.
    ///
    /// Fails with [`Error::Config`](crate::Error::Config) when `config` does
    /// not pass [`ClientConfig::validate`].
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let pool = PoolManager::new(connector, config.pool.clone());
        let mut pipeline = RequestPipeline::new(Arc::clone(&pool), config.pipeline.clone());
        if let Some(credentials) = config.credentials.clone() {
            pipeline = pipeline.with_signer(SigV4Signer::new(credentials, config.region.clone()));
        }
        let batch = BatchOrchestrator::new(
            pipeline.clone(),
            config.endpoint.clone(),
            config.batch.clone(),
            config.max_retries,
        );
        info!(endpoint = %config.endpoint, region = %config.region, "client ready");
        Ok(Self {
            pool,
            pipeline,
            batch,
            endpoint: config.endpoint,
            max_retries: config.max_retries,
        })
    }

    /// The shared pool manager.
    #[must_use]
    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    /// The endpoint every request goes to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Run a built request through the pipeline. Returns the terminal
    /// response whatever its status.
    pub async fn execute(&self, request: NativeRequest) -> Result<Response> {
        let request = request
            .into_request(self.endpoint.clone())?
            .with_max_retries(self.max_retries);
        Ok(self.pipeline.execute(request).await?)
    }

    async fn execute_checked(&self, request: NativeRequest) -> Result<(Value, Response)> {
        let marshaller = request.operation.marshaller();
        let response = self.execute(request).await?.error_for_status()?;
        let body = response.native_body_with(&marshaller)?;
        Ok((body, response))
    }

    /// Read one item. `None` when the table has no item with `key`.
    pub async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Item>> {
        let (body, _) = self.execute_checked(builders::get_item(table, key)).await?;
        Ok(body.get("item").and_then(Value::as_map).cloned())
    }

    /// Write one item.
    pub async fn put_item(&self, table: &str, item: Item) -> Result<Response> {
        let (_, response) = self.execute_checked(builders::put_item(table, item)).await?;
        Ok(response)
    }

    /// Delete one item.
    pub async fn delete_item(&self, table: &str, key: &ItemKey) -> Result<Response> {
        let (_, response) = self.execute_checked(builders::delete_item(table, key)).await?;
        Ok(response)
    }

    /// Create a table.
    pub async fn create_table(
        &self,
        table: &str,
        schema: &KeySchema,
        throughput: ProvisionedThroughput,
    ) -> Result<TableDescription> {
        let request = builders::create_table(table, schema, throughput);
        let (_, response) = self.execute_checked(request).await?;
        table_description(&response)
    }

    /// Delete a table.
    pub async fn delete_table(&self, table: &str) -> Result<TableDescription> {
        let (_, response) = self.execute_checked(builders::delete_table(table)).await?;
        table_description(&response)
    }

    /// Write any number of entries, split into concurrent batches.
    pub async fn batch_write(&self, entries: Vec<WriteEntry>) -> Vec<BatchOutcome> {
        self.batch.batch_write(entries).await
    }

    /// Read any number of keys from `table`.
    pub async fn batch_get(&self, table: &str, keys: Vec<ItemKey>) -> BatchGetResult {
        self.batch.batch_get(table, keys, &[]).await
    }

    /// Read any number of keys from `table`, returning only `attributes`.
    pub async fn batch_get_attributes(
        &self,
        table: &str,
        keys: Vec<ItemKey>,
        attributes: &[String],
    ) -> BatchGetResult {
        self.batch.batch_get(table, keys, attributes).await
    }

    /// Destroy every pool. Later calls rebuild pools lazily.
    pub fn shutdown(&self) {
        self.pool.close_all();
    }
}

fn table_description(response: &Response) -> Result<TableDescription> {
    let description = response
        .json()
        .and_then(|body| body.get("TableDescription"))
        .cloned()
        .unwrap_or_default();
    Ok(serde_json::from_value(description)?)
}
