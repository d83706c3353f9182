//! DynamoDB operation enum.

use std::fmt;

use crate::marshal::Marshaller;

/// Protocol version prefix of the `x-amz-target` header.
pub const API_VERSION: &str = "DynamoDB_20111205";

/// Content type of every request and response body.
pub const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// All supported DynamoDB operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    // Table management
    /// Create a new table.
    CreateTable,
    /// Delete a table.
    DeleteTable,

    // Item CRUD
    /// Put (insert or replace) an item.
    PutItem,
    /// Get an item by primary key.
    GetItem,
    /// Delete an item by primary key.
    DeleteItem,

    // Batch operations
    /// Batch get items from multiple tables.
    BatchGetItem,
    /// Batch write (put/delete) items to multiple tables.
    BatchWriteItem,
}

impl Operation {
    /// Returns the AWS operation name string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTable => "CreateTable",
            Self::DeleteTable => "DeleteTable",
            Self::PutItem => "PutItem",
            Self::GetItem => "GetItem",
            Self::DeleteItem => "DeleteItem",
            Self::BatchGetItem => "BatchGetItem",
            Self::BatchWriteItem => "BatchWriteItem",
        }
    }

    /// Parse an operation name string into an `Operation`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "CreateTable" => Some(Self::CreateTable),
            "DeleteTable" => Some(Self::DeleteTable),
            "PutItem" => Some(Self::PutItem),
            "GetItem" => Some(Self::GetItem),
            "DeleteItem" => Some(Self::DeleteItem),
            "BatchGetItem" => Some(Self::BatchGetItem),
            "BatchWriteItem" => Some(Self::BatchWriteItem),
            _ => None,
        }
    }

    /// The `x-amz-target` header value, e.g. `DynamoDB_20111205.GetItem`.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{API_VERSION}.{}", self.as_str())
    }

    /// Resolve an `x-amz-target` header value.
    #[must_use]
    pub fn from_target(target: &str) -> Option<Self> {
        let (version, name) = target.split_once('.')?;
        if version != API_VERSION {
            return None;
        }
        Self::from_name(name)
    }

    /// Native keys whose subtrees hold attribute values in this operation's
    /// request and response bodies.
    ///
    /// Table operations have none: their `HashKeyElement` is a schema
    /// element, not a key value.
    #[must_use]
    pub fn value_keys(&self) -> &'static [&'static str] {
        match self {
            Self::CreateTable | Self::DeleteTable => &[],
            Self::PutItem | Self::DeleteItem => &[
                "item",
                "attributes",
                "hash-key-element",
                "range-key-element",
                "value",
            ],
            Self::GetItem => &["item", "hash-key-element", "range-key-element"],
            Self::BatchWriteItem => &["item", "hash-key-element", "range-key-element"],
            Self::BatchGetItem => &["items", "hash-key-element", "range-key-element"],
        }
    }

    /// A marshaller configured for this operation.
    #[must_use]
    pub fn marshaller(&self) -> Marshaller {
        Marshaller::new(self.value_keys().iter().copied())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
