//! Batch orchestration.
//!
//! Entries are grouped by table and split into service-sized batches. Every
//! batch runs concurrently as its own resubmission chain: send, read the
//! unprocessed set from the response, and send exactly that set again until
//! the service reports nothing left. The responses that preceded the final
//! one are kept, oldest first, on the final response's `chain`.

use std::collections::BTreeMap;

use dynastack_http::{Endpoint, Request, RequestPipeline, Response};
use dynastack_model::types::{
    BatchGetItemInput, BatchGetItemOutput, BatchWriteItemInput, BatchWriteItemOutput, Key,
    KeysAndAttributes, WriteRequest, native_item, wire_item,
};
use dynastack_model::{Item, ItemKey, MarshalError, Operation};
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::BatchConfig;
use crate::error::{Error, Result};

/// One entry of a mass batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteEntry {
    /// Put `item` into `table`.
    Put {
        /// Target table.
        table: String,
        /// Item to write.
        item: Item,
        /// Caller tag reported back on the batch outcome.
        correlation_id: Option<String>,
    },
    /// Delete the item with `key` from `table`.
    Delete {
        /// Target table.
        table: String,
        /// Key of the item.
        key: ItemKey,
    },
}

impl WriteEntry {
    /// A put without a correlation id.
    pub fn put(table: impl Into<String>, item: Item) -> Self {
        Self::Put {
            table: table.into(),
            item,
            correlation_id: None,
        }
    }

    /// A delete.
    pub fn delete(table: impl Into<String>, key: ItemKey) -> Self {
        Self::Delete {
            table: table.into(),
            key,
        }
    }

    /// Tag a put with a correlation id. Deletes carry none.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        if let Self::Put { correlation_id, .. } = &mut self {
            *correlation_id = Some(id.into());
        }
        self
    }

    /// The target table.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Put { table, .. } | Self::Delete { table, .. } => table,
        }
    }

    /// The correlation id, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Put { correlation_id, .. } => correlation_id.as_deref(),
            Self::Delete { .. } => None,
        }
    }

    /// The wire write request.
    pub fn to_wire(&self) -> Result<WriteRequest, MarshalError> {
        Ok(match self {
            Self::Put { item, .. } => WriteRequest::put(wire_item(item)?),
            Self::Delete { key, .. } => WriteRequest::delete(Key::try_from(key)?),
        })
    }
}

/// Entries bound for one table, sent as one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    /// Target table.
    pub table: String,
    /// Entries, at most the configured batch size.
    pub entries: Vec<WriteEntry>,
}

/// Group `entries` by table, keeping input order within a table, and split
/// each group into batches of at most `size` entries.
#[must_use]
pub fn split_writes(entries: Vec<WriteEntry>, size: usize) -> Vec<WriteBatch> {
    let mut by_table: BTreeMap<String, Vec<WriteEntry>> = BTreeMap::new();
    for entry in entries {
        by_table
            .entry(entry.table().to_owned())
            .or_default()
            .push(entry);
    }
    by_table
        .into_iter()
        .flat_map(|(table, entries)| {
            chunk(entries, size)
                .into_iter()
                .map(move |entries| WriteBatch {
                    table: table.clone(),
                    entries,
                })
        })
        .collect()
}

fn chunk<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        chunks.push(items.by_ref().take(size).collect());
    }
    chunks
}

/// Result of one original batch and its resubmission chain.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Target table.
    pub table: String,
    /// Entries (writes) or keys (gets) in the original batch.
    pub entries: usize,
    /// Correlation ids of the batch's entries, in entry order.
    pub correlation_ids: Vec<String>,
    /// The final response, or why the chain ended without one.
    pub result: Result<Response>,
}

impl BatchOutcome {
    /// Every response of the chain in causal order, the final one last.
    ///
    /// Chains that ended in a service error or at the resubmission cap
    /// still contribute the responses they received.
    #[must_use]
    pub fn responses(&self) -> Vec<Response> {
        let last = match &self.result {
            Ok(response) => response,
            Err(err) => match err.response() {
                Some(response) => response,
                None => return Vec::new(),
            },
        };
        let mut responses = last.chain.clone();
        if last.is_success() {
            let mut last = last.clone();
            last.chain.clear();
            responses.push(last);
        }
        responses
    }
}

/// All pages of a mass batch get.
#[derive(Debug)]
pub struct BatchGetResult {
    /// One outcome per page.
    pub pages: Vec<BatchOutcome>,
    /// Every successful response across all pages, each page's chain in
    /// causal order.
    pub responses: Vec<Response>,
}

impl BatchGetResult {
    /// Items returned for `table` across every response.
    pub fn items(&self, table: &str) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        for response in &self.responses {
            let Some(json) = response.json() else {
                continue;
            };
            let output: BatchGetItemOutput = serde_json::from_value(json.clone())?;
            if let Some(found) = output.responses.get(table) {
                for item in &found.items {
                    items.push(native_item(item)?);
                }
            }
        }
        Ok(items)
    }

    /// Pages that ended in an error.
    pub fn failures(&self) -> impl Iterator<Item = (&BatchOutcome, &Error)> {
        self.pages
            .iter()
            .filter_map(|page| page.result.as_ref().err().map(|err| (page, err)))
    }
}

/// A batch request body that can be resubmitted from its own response.
trait Resubmit: Serialize + Sized {
    const OPERATION: Operation;
    type Output: DeserializeOwned + Default;

    fn unprocessed(output: &Self::Output) -> usize;

    fn follow_up(output: Self::Output) -> Self;
}

impl Resubmit for BatchWriteItemInput {
    const OPERATION: Operation = Operation::BatchWriteItem;
    type Output = BatchWriteItemOutput;

    fn unprocessed(output: &Self::Output) -> usize {
        output.unprocessed_count()
    }

    fn follow_up(output: Self::Output) -> Self {
        Self {
            request_items: output
                .unprocessed_items
                .into_iter()
                .filter(|(_, requests)| !requests.is_empty())
                .collect(),
        }
    }
}

impl Resubmit for BatchGetItemInput {
    const OPERATION: Operation = Operation::BatchGetItem;
    type Output = BatchGetItemOutput;

    fn unprocessed(output: &Self::Output) -> usize {
        output.unprocessed_count()
    }

    fn follow_up(output: Self::Output) -> Self {
        Self {
            request_items: output
                .unprocessed_keys
                .into_iter()
                .filter(|(_, keys)| !keys.keys.is_empty())
                .collect(),
        }
    }
}

/// Splits, dispatches and resubmits batch operations.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    pipeline: RequestPipeline,
    endpoint: Endpoint,
    config: BatchConfig,
    max_retries: Option<u32>,
}

impl BatchOrchestrator {
    /// Orchestrator sending through `pipeline` to `endpoint`.
    #[must_use]
    pub fn new(
        pipeline: RequestPipeline,
        endpoint: Endpoint,
        config: BatchConfig,
        max_retries: Option<u32>,
    ) -> Self {
        Self {
            pipeline,
            endpoint,
            config,
            max_retries,
        }
    }

    /// Write every entry. Returns one outcome per original batch; a failed
    /// batch does not affect its siblings.
    pub async fn batch_write(&self, entries: Vec<WriteEntry>) -> Vec<BatchOutcome> {
        let batches = split_writes(entries, self.config.write_size);
        debug!(batches = batches.len(), "dispatching batch write");
        join_all(batches.into_iter().map(|batch| self.write_batch(batch))).await
    }

    async fn write_batch(&self, batch: WriteBatch) -> BatchOutcome {
        let correlation_ids = batch
            .entries
            .iter()
            .filter_map(WriteEntry::correlation_id)
            .map(str::to_owned)
            .collect();
        let result = async {
            let requests = batch
                .entries
                .iter()
                .map(WriteEntry::to_wire)
                .collect::<Result<Vec<_>, _>>()?;
            let input = BatchWriteItemInput {
                request_items: BTreeMap::from([(batch.table.clone(), requests)]),
            };
            self.run_chain(&batch.table, input).await
        }
        .await;
        BatchOutcome {
            table: batch.table,
            entries: batch.entries.len(),
            correlation_ids,
            result,
        }
    }

    /// Read every key from `table`, optionally projecting `attributes`.
    pub async fn batch_get(
        &self,
        table: &str,
        keys: Vec<ItemKey>,
        attributes: &[String],
    ) -> BatchGetResult {
        let pages = chunk(keys, self.config.get_size);
        debug!(table, pages = pages.len(), "dispatching batch get");
        let pages = join_all(
            pages
                .into_iter()
                .map(|keys| self.get_page(table, keys, attributes)),
        )
        .await;
        let responses = pages.iter().flat_map(BatchOutcome::responses).collect();
        BatchGetResult { pages, responses }
    }

    async fn get_page(&self, table: &str, keys: Vec<ItemKey>, attributes: &[String]) -> BatchOutcome {
        let entries = keys.len();
        let result = async {
            let keys = keys
                .iter()
                .map(Key::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            let input = BatchGetItemInput {
                request_items: BTreeMap::from([(
                    table.to_owned(),
                    KeysAndAttributes {
                        keys,
                        attributes_to_get: attributes.to_vec(),
                    },
                )]),
            };
            self.run_chain(table, input).await
        }
        .await;
        BatchOutcome {
            table: table.to_owned(),
            entries,
            correlation_ids: Vec::new(),
            result,
        }
    }

    /// Send `input`, then keep sending the unprocessed remainder until none
    /// is left. Each follow-up is built only after the previous response has
    /// been classified.
    async fn run_chain<I: Resubmit>(&self, table: &str, mut input: I) -> Result<Response> {
        let mut chain: Vec<Response> = Vec::new();
        let mut resubmissions = 0_u32;
        loop {
            let request = Request::for_operation(
                self.endpoint.clone(),
                I::OPERATION,
                serde_json::to_value(&input)?,
            )
            .with_max_retries(self.max_retries);
            let mut response = self.pipeline.execute(request).await?;
            response.chain = std::mem::take(&mut chain);
            let response = response.error_for_status()?;

            let output: I::Output = match response.json() {
                Some(json) => serde_json::from_value(json.clone())?,
                None => I::Output::default(),
            };
            let remaining = I::unprocessed(&output);
            if remaining == 0 {
                return Ok(response);
            }
            if self
                .config
                .max_resubmissions
                .is_some_and(|max| resubmissions >= max)
            {
                warn!(table, remaining, resubmissions, "giving up on unprocessed entries");
                return Err(Error::UnprocessedRemaining {
                    remaining,
                    resubmissions,
                    response: Box::new(response),
                });
            }

            debug!(table, unprocessed = remaining, "resubmitting unprocessed entries");
            let mut previous = response;
            chain = std::mem::take(&mut previous.chain);
            chain.push(previous);
            input = I::follow_up(output);
            resubmissions += 1;
        }
    }
}
