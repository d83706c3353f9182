//! Request builders for the single-item and table operations.
//!
//! Each builder shapes a native body with dash-case keys. The body is only
//! converted to wire form by [`NativeRequest::into_request`], which uses the
//! operation's own value keys.

use std::collections::BTreeMap;

use dynastack_http::{Endpoint, Request};
use dynastack_model::types::{KeySchema, KeySchemaElement, ProvisionedThroughput};
use dynastack_model::{Item, ItemKey, MarshalError, Operation, Value};

/// An operation with its native body.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRequest {
    /// The operation.
    pub operation: Operation,
    /// Native request body.
    pub body: Value,
}

impl NativeRequest {
    fn new<const N: usize>(operation: Operation, fields: [(&str, Value); N]) -> Self {
        Self {
            operation,
            body: Value::map(fields),
        }
    }

    /// Set an optional body field, e.g. `consistent-read` or
    /// `return-values`.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Map(body) = &mut self.body {
            body.insert(key.to_owned(), value.into());
        }
        self
    }

    /// Marshal the body and attach the protocol headers.
    pub fn into_request(self, endpoint: Endpoint) -> Result<Request, MarshalError> {
        let body = self.operation.marshaller().to_wire(&self.body)?;
        Ok(Request::for_operation(endpoint, self.operation, body))
    }
}

/// `GetItem` for `key` in `table`.
#[must_use]
pub fn get_item(table: &str, key: &ItemKey) -> NativeRequest {
    NativeRequest::new(
        Operation::GetItem,
        [("table-name", table.into()), ("key", key.to_native())],
    )
}

/// `PutItem` of `item` into `table`.
#[must_use]
pub fn put_item(table: &str, item: Item) -> NativeRequest {
    NativeRequest::new(
        Operation::PutItem,
        [("table-name", table.into()), ("item", item.into())],
    )
}

/// `DeleteItem` for `key` in `table`.
#[must_use]
pub fn delete_item(table: &str, key: &ItemKey) -> NativeRequest {
    NativeRequest::new(
        Operation::DeleteItem,
        [("table-name", table.into()), ("key", key.to_native())],
    )
}

/// `CreateTable` with a 2011 key schema.
#[must_use]
pub fn create_table(
    table: &str,
    schema: &KeySchema,
    throughput: ProvisionedThroughput,
) -> NativeRequest {
    let mut key_schema = BTreeMap::new();
    key_schema.insert(
        "hash-key-element".to_owned(),
        schema_element(&schema.hash_key_element),
    );
    if let Some(range) = &schema.range_key_element {
        key_schema.insert("range-key-element".to_owned(), schema_element(range));
    }
    NativeRequest::new(
        Operation::CreateTable,
        [
            ("table-name", table.into()),
            ("key-schema", Value::Map(key_schema)),
            (
                "provisioned-throughput",
                Value::map([
                    ("read-capacity-units", throughput.read_capacity_units.into()),
                    ("write-capacity-units", throughput.write_capacity_units.into()),
                ]),
            ),
        ],
    )
}

/// `DeleteTable` for `table`.
#[must_use]
pub fn delete_table(table: &str) -> NativeRequest {
    NativeRequest::new(Operation::DeleteTable, [("table-name", table.into())])
}

fn schema_element(element: &KeySchemaElement) -> Value {
    let attribute_type = match element.attribute_type {
        dynastack_model::types::ScalarAttributeType::S => "S",
        dynastack_model::types::ScalarAttributeType::N => "N",
    };
    Value::map([
        ("attribute-name", Value::from(element.attribute_name.as_str())),
        ("attribute-type", Value::from(attribute_type)),
    ])
}
