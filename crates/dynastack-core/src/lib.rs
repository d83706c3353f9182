//! DynamoDB client engine for dynastack.
//!
//! [`DynamoClient`] is the entry point: single-item and table operations go
//! straight through the request pipeline, batch operations go through the
//! [`BatchOrchestrator`], which splits, dispatches concurrently and
//! resubmits unprocessed entries until the service has applied them all.
#![allow(clippy::doc_markdown)]

pub mod batch;
pub mod builders;
pub mod client;
pub mod config;
pub mod error;

pub use batch::{BatchGetResult, BatchOrchestrator, BatchOutcome, WriteBatch, WriteEntry};
pub use builders::NativeRequest;
pub use client::DynamoClient;
pub use config::{BatchConfig, ClientConfig};
pub use error::{Error, Result};
