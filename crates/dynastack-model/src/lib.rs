//! DynamoDB wire model for dynastack.
//!
//! This crate holds everything that describes a request or response body:
//! attribute values, native values, the typed 2011 batch shapes, service
//! errors, and the [`Marshaller`] that converts native bodies to wire bodies
//! and back.
// "DynamoDB" appears in virtually every doc comment in this crate.
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod attribute_value;
pub mod error;
pub mod marshal;
pub mod operations;
pub mod types;
pub mod value;

pub use attribute_value::AttributeValue;
pub use error::{ServiceError, ServiceErrorCode};
pub use marshal::{MarshalError, Marshaller};
pub use operations::{API_VERSION, CONTENT_TYPE, Operation};
pub use value::{Item, ItemKey, Value, WireTag};
