//! In-process DynamoDB stand-in speaking the `DynamoDB_20111205` JSON
//! protocol over a real TCP listener.
//!
//! Tables live in memory. Tests steer the server through [`Fault`]s, which
//! are consumed one per request, and through batch budgets, which cap how
//! many entries a single batch call applies before reporting the rest as
//! unprocessed.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use dynastack_auth::{CredentialProvider, Credentials, StaticCredentialProvider, verify_sigv4};
use dynastack_http::Endpoint;
use dynastack_model::types::{
    BatchGetItemInput, BatchGetItemOutput, BatchGetTableResponse, BatchWriteItemInput,
    BatchWriteItemOutput, ConsumedCapacity, Key, KeySchema, KeysAndAttributes,
    ProvisionedThroughput, TableDescription, WireItem, WriteRequest,
};
use dynastack_model::{AttributeValue, CONTENT_TYPE, Operation, ServiceError, ServiceErrorCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type StoredKey = (AttributeValue, Option<AttributeValue>);

const MAX_BATCH_WRITES: usize = 25;
const MAX_BATCH_GETS: usize = 100;

/// A misbehaviour applied to the next request the server receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Answer 400 `ProvisionedThroughputExceededException`.
    Throttle,
    /// Answer 500 `InternalServerError`.
    ServerError,
    /// Answer with an error of the given code.
    Reject(ServiceErrorCode),
    /// Process normally but send a wrong `x-amz-crc32`.
    BadChecksum,
    /// Never answer.
    Stall,
}

#[derive(Debug)]
struct Table {
    schema: KeySchema,
    throughput: Option<ProvisionedThroughput>,
    items: HashMap<StoredKey, WireItem>,
}

impl Table {
    fn key_of(&self, item: &WireItem) -> Result<StoredKey, ServiceError> {
        let hash = item
            .get(&self.schema.hash_key_element.attribute_name)
            .cloned()
            .ok_or_else(|| validation("item is missing its hash key attribute"))?;
        let range = match &self.schema.range_key_element {
            Some(element) => Some(
                item.get(&element.attribute_name)
                    .cloned()
                    .ok_or_else(|| validation("item is missing its range key attribute"))?,
            ),
            None => None,
        };
        Ok((hash, range))
    }

    fn description(&self, name: &str, status: &str) -> TableDescription {
        TableDescription {
            table_name: name.to_owned(),
            table_status: status.to_owned(),
            key_schema: Some(self.schema.clone()),
            provisioned_throughput: self.throughput,
        }
    }
}

fn stored_key(key: Key) -> StoredKey {
    (key.hash_key_element, key.range_key_element)
}

fn validation(message: &str) -> ServiceError {
    ServiceError::new(ServiceErrorCode::ValidationException, message)
}

fn not_found(table: &str) -> ServiceError {
    ServiceError::new(
        ServiceErrorCode::ResourceNotFoundException,
        format!("Requested resource not found: Table: {table} not found"),
    )
}

/// Shared state behind every connection.
#[derive(Debug, Default)]
struct FakeState {
    tables: Mutex<HashMap<String, Table>>,
    faults: Mutex<VecDeque<Fault>>,
    write_budget: Mutex<Option<usize>>,
    get_budget: Mutex<Option<usize>>,
    received: Mutex<Vec<(Operation, Value)>>,
    connections: AtomicUsize,
    credentials: Option<StaticCredentialProvider>,
}

impl FakeState {
    fn dispatch(&self, op: Operation, body: &Value) -> Result<Value, ServiceError> {
        match op {
            Operation::CreateTable => self.create_table(body),
            Operation::DeleteTable => self.delete_table(body),
            Operation::PutItem => self.put_item(body),
            Operation::GetItem => self.get_item(body),
            Operation::DeleteItem => self.delete_item(body),
            Operation::BatchWriteItem => self.batch_write_item(body),
            Operation::BatchGetItem => self.batch_get_item(body),
        }
    }

    fn create_table(&self, body: &Value) -> Result<Value, ServiceError> {
        let name = table_name(body)?;
        let schema: KeySchema = field(body, "KeySchema")?;
        let throughput = body
            .get("ProvisionedThroughput")
            .map(|raw| serde_json::from_value(raw.clone()))
            .transpose()
            .map_err(|e| validation(&e.to_string()))?;
        let mut tables = self.tables.lock();
        if tables.contains_key(name) {
            return Err(ServiceError::new(
                ServiceErrorCode::ResourceInUseException,
                format!("Attempt to change a resource which is still in use: Table: {name}"),
            ));
        }
        let table = Table {
            schema,
            throughput,
            items: HashMap::new(),
        };
        let description = table.description(name, "CREATING");
        tables.insert(name.to_owned(), table);
        Ok(json!({ "TableDescription": description }))
    }

    fn delete_table(&self, body: &Value) -> Result<Value, ServiceError> {
        let name = table_name(body)?;
        let table = self.tables.lock().remove(name).ok_or_else(|| not_found(name))?;
        Ok(json!({ "TableDescription": table.description(name, "DELETING") }))
    }

    fn put_item(&self, body: &Value) -> Result<Value, ServiceError> {
        let name = table_name(body)?;
        let item: WireItem = field(body, "Item")?;
        let mut tables = self.tables.lock();
        let table = tables.get_mut(name).ok_or_else(|| not_found(name))?;
        let key = table.key_of(&item)?;
        table.items.insert(key, item);
        Ok(json!({ "ConsumedCapacityUnits": 1.0 }))
    }

    fn get_item(&self, body: &Value) -> Result<Value, ServiceError> {
        let name = table_name(body)?;
        let key: Key = field(body, "Key")?;
        let tables = self.tables.lock();
        let table = tables.get(name).ok_or_else(|| not_found(name))?;
        Ok(match table.items.get(&stored_key(key)) {
            Some(item) => json!({ "Item": item, "ConsumedCapacityUnits": 0.5 }),
            None => json!({ "ConsumedCapacityUnits": 0.5 }),
        })
    }

    fn delete_item(&self, body: &Value) -> Result<Value, ServiceError> {
        let name = table_name(body)?;
        let key: Key = field(body, "Key")?;
        let mut tables = self.tables.lock();
        let table = tables.get_mut(name).ok_or_else(|| not_found(name))?;
        table.items.remove(&stored_key(key));
        Ok(json!({ "ConsumedCapacityUnits": 1.0 }))
    }

    fn batch_write_item(&self, body: &Value) -> Result<Value, ServiceError> {
        let input: BatchWriteItemInput =
            serde_json::from_value(body.clone()).map_err(|e| validation(&e.to_string()))?;
        let total: usize = input.request_items.values().map(Vec::len).sum();
        if total == 0 || total > MAX_BATCH_WRITES {
            return Err(validation(
                "Too many items requested for the BatchWriteItem call",
            ));
        }

        let mut budget = self.write_budget.lock().unwrap_or(usize::MAX);
        let mut tables = self.tables.lock();
        let mut output = BatchWriteItemOutput::default();
        for (name, requests) in input.request_items {
            let table = tables.get_mut(&name).ok_or_else(|| not_found(&name))?;
            let mut applied = 0_u32;
            for request in requests {
                if budget == 0 {
                    output
                        .unprocessed_items
                        .entry(name.clone())
                        .or_default()
                        .push(request);
                    continue;
                }
                budget -= 1;
                applied += 1;
                apply_write(table, request)?;
            }
            output.responses.insert(
                name,
                ConsumedCapacity {
                    consumed_capacity_units: f64::from(applied),
                },
            );
        }
        serde_json::to_value(output).map_err(|e| internal(&e.to_string()))
    }

    fn batch_get_item(&self, body: &Value) -> Result<Value, ServiceError> {
        let input: BatchGetItemInput =
            serde_json::from_value(body.clone()).map_err(|e| validation(&e.to_string()))?;
        let total: usize = input.request_items.values().map(|k| k.keys.len()).sum();
        if total == 0 || total > MAX_BATCH_GETS {
            return Err(validation("Too many items requested for the BatchGetItem call"));
        }

        let mut budget = self.get_budget.lock().unwrap_or(usize::MAX);
        let tables = self.tables.lock();
        let mut output = BatchGetItemOutput::default();
        for (name, request) in input.request_items {
            let table = tables.get(&name).ok_or_else(|| not_found(&name))?;
            let mut response = BatchGetTableResponse::default();
            for key in request.keys {
                if budget == 0 {
                    output
                        .unprocessed_keys
                        .entry(name.clone())
                        .or_insert_with(|| KeysAndAttributes {
                            keys: Vec::new(),
                            attributes_to_get: request.attributes_to_get.clone(),
                        })
                        .keys
                        .push(key);
                    continue;
                }
                budget -= 1;
                response.consumed_capacity_units += 0.5;
                if let Some(item) = table.items.get(&stored_key(key)) {
                    response.items.push(project(item, &request.attributes_to_get));
                }
            }
            output.responses.insert(name, response);
        }
        serde_json::to_value(output).map_err(|e| internal(&e.to_string()))
    }
}

fn apply_write(table: &mut Table, request: WriteRequest) -> Result<(), ServiceError> {
    match (request.put_request, request.delete_request) {
        (Some(put), None) => {
            let key = table.key_of(&put.item)?;
            table.items.insert(key, put.item);
        }
        (None, Some(delete)) => {
            table.items.remove(&stored_key(delete.key));
        }
        _ => {
            return Err(validation(
                "WriteRequest must hold exactly one of PutRequest or DeleteRequest",
            ));
        }
    }
    Ok(())
}

fn project(item: &WireItem, attributes: &[String]) -> WireItem {
    if attributes.is_empty() {
        return item.clone();
    }
    item.iter()
        .filter(|(name, _)| attributes.contains(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn internal(message: &str) -> ServiceError {
    ServiceError::new(ServiceErrorCode::InternalServerError, message)
}

fn table_name(body: &Value) -> Result<&str, ServiceError> {
    body.get("TableName")
        .and_then(Value::as_str)
        .ok_or_else(|| validation("TableName is required"))
}

fn field<T: serde::de::DeserializeOwned>(body: &Value, name: &str) -> Result<T, ServiceError> {
    let raw = body
        .get(name)
        .ok_or_else(|| validation(&format!("{name} is required")))?;
    serde_json::from_value(raw.clone()).map_err(|e| validation(&format!("{name}: {e}")))
}

/// Hyper `Service` routing every request into [`FakeState`].
#[derive(Debug, Clone)]
struct FakeService {
    state: Arc<FakeState>,
}

impl hyper::service::Service<http::Request<Incoming>> for FakeService {
    type Response = http::Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<Incoming>) -> Self::Future {
        let state = Arc::clone(&self.state);
        let request_id = uuid::Uuid::new_v4().to_string();

        Box::pin(async move {
            let mut response = process_request(req, &state).await;
            if let Ok(hv) = http::HeaderValue::from_str(&request_id) {
                response.headers_mut().insert("x-amzn-requestid", hv);
            }
            Ok(response)
        })
    }
}

async fn process_request(
    req: http::Request<Incoming>,
    state: &FakeState,
) -> http::Response<Full<Bytes>> {
    let (parts, incoming) = req.into_parts();

    if parts.method != http::Method::POST {
        return error_response(&validation("DynamoDB requires POST"));
    }

    let Some(op) = parts
        .headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .and_then(Operation::from_target)
    else {
        return error_response(&ServiceError::new(
            ServiceErrorCode::UnrecognizedClientException,
            "unknown x-amz-target",
        ));
    };

    let body = match incoming.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return error_response(&internal(&format!("failed to read body: {e}"))),
    };

    if let Some(provider) = &state.credentials {
        let signed = http::Request::from_parts(parts, body.clone());
        if let Err(e) = verify_sigv4(&signed, provider as &dyn CredentialProvider) {
            return error_response(&ServiceError::new(
                ServiceErrorCode::AccessDeniedException,
                e.to_string(),
            ));
        }
    }

    let body: Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            return error_response(&ServiceError::new(
                ServiceErrorCode::SerializationException,
                e.to_string(),
            ));
        }
    };
    debug!(operation = %op, "fake dynamodb request");
    state.received.lock().push((op, body.clone()));

    let fault = state.faults.lock().pop_front();
    match fault {
        Some(Fault::Throttle) => {
            return error_response(&ServiceError::new(
                ServiceErrorCode::ProvisionedThroughputExceededException,
                "The level of configured provisioned throughput for the table was exceeded",
            ));
        }
        Some(Fault::ServerError) => return error_response(&internal("internal failure")),
        Some(Fault::Reject(code)) => {
            return error_response(&ServiceError::new(code, "rejected by fault injection"));
        }
        Some(Fault::Stall) => std::future::pending::<()>().await,
        Some(Fault::BadChecksum) | None => {}
    }

    let mut response = match state.dispatch(op, &body) {
        Ok(body) => json_response(http::StatusCode::OK, &body),
        Err(err) => error_response(&err),
    };
    if fault == Some(Fault::BadChecksum) {
        response
            .headers_mut()
            .insert("x-amz-crc32", http::HeaderValue::from_static("1"));
    }
    response
}

fn json_response(status: http::StatusCode, body: &Value) -> http::Response<Full<Bytes>> {
    let bytes = Bytes::from(body.to_string());
    let crc = crc32fast::hash(&bytes);
    let mut response = http::Response::new(Full::new(bytes));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static(CONTENT_TYPE),
    );
    headers.insert("x-amz-crc32", http::HeaderValue::from(crc));
    response
}

fn error_response(err: &ServiceError) -> http::Response<Full<Bytes>> {
    let status = err
        .code
        .map_or(http::StatusCode::BAD_REQUEST, |code| code.default_status_code());
    json_response(status, &err.to_json())
}

/// A running stand-in server. Stops accepting when dropped.
#[derive(Debug)]
pub struct FakeDynamo {
    addr: SocketAddr,
    state: Arc<FakeState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FakeDynamo {
    /// Start a server that accepts unsigned requests.
    pub async fn start() -> anyhow::Result<Self> {
        Self::launch(FakeState::default()).await
    }

    /// Start a server that rejects requests not signed with `credentials`.
    pub async fn start_signed(credentials: Credentials) -> anyhow::Result<Self> {
        Self::launch(FakeState {
            credentials: Some(StaticCredentialProvider::from_credentials([credentials])),
            ..FakeState::default()
        })
        .await
    }

    async fn launch(state: FakeState) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(state);
        let (tx, rx) = oneshot::channel();
        tokio::spawn(serve(
            listener,
            FakeService {
                state: Arc::clone(&state),
            },
            rx,
        ));
        Ok(Self {
            addr,
            state,
            shutdown: Some(tx),
        })
    }

    /// Endpoint the client should talk to.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::http("127.0.0.1", self.addr.port())
    }

    /// Queue a fault for an upcoming request.
    pub fn inject(&self, fault: Fault) {
        self.state.faults.lock().push_back(fault);
    }

    /// Apply at most `limit` write requests per `BatchWriteItem` call.
    pub fn limit_batch_writes(&self, limit: usize) {
        *self.state.write_budget.lock() = Some(limit);
    }

    /// Serve at most `limit` keys per `BatchGetItem` call.
    pub fn limit_batch_gets(&self, limit: usize) {
        *self.state.get_budget.lock() = Some(limit);
    }

    /// Bodies received for `op`, in arrival order.
    #[must_use]
    pub fn received(&self, op: Operation) -> Vec<Value> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|(received, _)| *received == op)
            .map(|(_, body)| body.clone())
            .collect()
    }

    /// TCP connections accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Number of items stored in `table`.
    #[must_use]
    pub fn item_count(&self, table: &str) -> usize {
        self.state
            .tables
            .lock()
            .get(table)
            .map_or(0, |t| t.items.len())
    }

    /// Look an item up directly, bypassing the protocol.
    #[must_use]
    pub fn stored_item(&self, table: &str, key: Key) -> Option<WireItem> {
        self.state
            .tables
            .lock()
            .get(table)
            .and_then(|t| t.items.get(&stored_key(key)).cloned())
    }

    /// Create a table directly, bypassing the protocol.
    pub fn create_table(&self, name: &str, schema: KeySchema) {
        self.state.tables.lock().insert(
            name.to_owned(),
            Table {
                schema,
                throughput: None,
                items: HashMap::new(),
            },
        );
    }
}

impl Drop for FakeDynamo {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn serve(listener: TcpListener, service: FakeService, mut shutdown: oneshot::Receiver<()>) {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                service.state.connections.fetch_add(1, Ordering::SeqCst);

                let conn = http.serve_connection(TokioIo::new(stream), service.clone());
                let conn = graceful.watch(conn.into_owned());
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        debug!(peer_addr = %peer_addr, error = %e, "connection closed with error");
                    }
                });
            }
            _ = &mut shutdown => break,
        }
    }

    // Stalled requests never finish, so draining is not awaited.
    drop(graceful);
}
