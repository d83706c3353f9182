//! Typed wire shapes for the 2011-12-05 API.
//!
//! All types follow the DynamoDB JSON wire format with `PascalCase` field names.
//! Structs use `#[serde(rename_all = "PascalCase")]` to match the DynamoDB API.
//!
//! The batch shapes are what the orchestrator reads back from responses: the
//! unprocessed sets are resubmitted exactly as the service returned them, so
//! they stay in wire form rather than going through the native marshaller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;
use crate::marshal::MarshalError;
use crate::value::{Item, ItemKey, Value};

/// A wire item: attribute name to attribute value.
pub type WireItem = BTreeMap<String, AttributeValue>;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Primary key of an item in the 2011 key shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Key {
    /// Hash key element.
    pub hash_key_element: AttributeValue,
    /// Range key element, for composite keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_key_element: Option<AttributeValue>,
}

impl TryFrom<&ItemKey> for Key {
    type Error = MarshalError;

    fn try_from(key: &ItemKey) -> Result<Self, Self::Error> {
        Ok(Self {
            hash_key_element: AttributeValue::try_from(&key.hash)?,
            range_key_element: key
                .range
                .as_ref()
                .map(AttributeValue::try_from)
                .transpose()?,
        })
    }
}

/// Convert a native item to its wire form.
pub fn wire_item(item: &Item) -> Result<WireItem, MarshalError> {
    item.iter()
        .map(|(name, value)| Ok((name.clone(), AttributeValue::try_from(value)?)))
        .collect()
}

/// Convert a wire item to its native form.
pub fn native_item(item: &WireItem) -> Result<Item, MarshalError> {
    item.iter()
        .map(|(name, value)| Ok((name.clone(), Value::from_attribute(value.clone())?)))
        .collect()
}

// ---------------------------------------------------------------------------
// Table management
// ---------------------------------------------------------------------------

/// Scalar type of a key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarAttributeType {
    /// String.
    S,
    /// Number.
    N,
}

/// One element of a 2011 key schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchemaElement {
    /// Name of the key attribute.
    pub attribute_name: String,
    /// Scalar type of the key attribute.
    pub attribute_type: ScalarAttributeType,
}

/// 2011 key schema: hash element plus optional range element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchema {
    /// Hash key element.
    pub hash_key_element: KeySchemaElement,
    /// Range key element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_key_element: Option<KeySchemaElement>,
}

/// Provisioned read/write capacity for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisionedThroughput {
    /// Read capacity units.
    pub read_capacity_units: i64,
    /// Write capacity units.
    pub write_capacity_units: i64,
}

/// Table state as reported by `CreateTable`/`DeleteTable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDescription {
    /// Table name.
    pub table_name: String,
    /// `CREATING`, `ACTIVE`, `DELETING` or `UPDATING`.
    pub table_status: String,
    /// Key schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_schema: Option<KeySchema>,
    /// Provisioned throughput.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioned_throughput: Option<ProvisionedThroughput>,
}

// ---------------------------------------------------------------------------
// Batch operations
// ---------------------------------------------------------------------------

/// A single write request within a `BatchWriteItem` operation.
///
/// Exactly one of `put_request` or `delete_request` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteRequest {
    /// A request to put an item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put_request: Option<PutRequest>,
    /// A request to delete an item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_request: Option<DeleteRequest>,
}

impl WriteRequest {
    /// A put request.
    #[must_use]
    pub fn put(item: WireItem) -> Self {
        Self {
            put_request: Some(PutRequest { item }),
            delete_request: None,
        }
    }

    /// A delete request.
    #[must_use]
    pub fn delete(key: Key) -> Self {
        Self {
            put_request: None,
            delete_request: Some(DeleteRequest { key }),
        }
    }
}

/// A request to put an item within a `BatchWriteItem` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRequest {
    /// The item attributes to put.
    pub item: WireItem,
}

/// A request to delete an item within a `BatchWriteItem` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteRequest {
    /// The primary key of the item to delete.
    pub key: Key,
}

/// The keys to read from one table in a `BatchGetItem` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeysAndAttributes {
    /// Keys of the items to read.
    pub keys: Vec<Key>,
    /// Attributes to return; all when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes_to_get: Vec<String>,
}

/// `BatchWriteItem` request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchWriteItemInput {
    /// Write requests by table name.
    pub request_items: BTreeMap<String, Vec<WriteRequest>>,
}

/// Consumed capacity reported per table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsumedCapacity {
    /// Capacity units consumed.
    #[serde(default)]
    pub consumed_capacity_units: f64,
}

/// `BatchWriteItem` response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchWriteItemOutput {
    /// Consumed capacity by table name.
    #[serde(default)]
    pub responses: BTreeMap<String, ConsumedCapacity>,
    /// Write requests the service did not apply, by table name.
    #[serde(default)]
    pub unprocessed_items: BTreeMap<String, Vec<WriteRequest>>,
}

impl BatchWriteItemOutput {
    /// Total number of unprocessed write requests across tables.
    #[must_use]
    pub fn unprocessed_count(&self) -> usize {
        self.unprocessed_items.values().map(Vec::len).sum()
    }
}

/// `BatchGetItem` request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetItemInput {
    /// Keys to read by table name.
    pub request_items: BTreeMap<String, KeysAndAttributes>,
}

/// Items returned for one table by `BatchGetItem`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetTableResponse {
    /// Items found.
    #[serde(default)]
    pub items: Vec<WireItem>,
    /// Capacity units consumed.
    #[serde(default)]
    pub consumed_capacity_units: f64,
}

/// `BatchGetItem` response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetItemOutput {
    /// Items by table name.
    #[serde(default)]
    pub responses: BTreeMap<String, BatchGetTableResponse>,
    /// Keys the service did not read, by table name.
    #[serde(default)]
    pub unprocessed_keys: BTreeMap<String, KeysAndAttributes>,
}

impl BatchGetItemOutput {
    /// Total number of unprocessed keys across tables.
    #[must_use]
    pub fn unprocessed_count(&self) -> usize {
        self.unprocessed_keys.values().map(|k| k.keys.len()).sum()
    }
}
