//! In-process document store.
//!
//! Holds collections in memory. Used for embedding the engine and for tests;
//! a collection can be configured to fail mid-stream to simulate a lost source.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;

use super::{DocumentStream, RawDocument, SourceStore};
use crate::error::{MigrateError, Result};

/// Document store backed by in-memory collections.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    collections: HashMap<String, Vec<RawDocument>>,
    failures: HashMap<String, usize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a collection.
    pub fn with_collection(mut self, name: impl Into<String>, docs: Vec<RawDocument>) -> Self {
        self.collections.insert(name.into(), docs);
        self
    }

    /// Add a collection from JSON values; non-object values are skipped.
    pub fn with_values(self, name: impl Into<String>, values: Vec<Value>) -> Self {
        let docs = values
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.with_collection(name, docs)
    }

    /// Make the cursor of `collection` fail after yielding `after` documents.
    pub fn with_failure_after(mut self, collection: impl Into<String>, after: usize) -> Self {
        self.failures.insert(collection.into(), after);
        self
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn count(&self, collection: &str) -> Result<u64> {
        Ok(self
            .collections
            .get(collection)
            .map(|docs| docs.len() as u64)
            .unwrap_or(0))
    }

    async fn open_cursor(&self, collection: &str, _batch_size: usize) -> Result<DocumentStream> {
        let docs = self.collections.get(collection).cloned().unwrap_or_default();

        match self.failures.get(collection).copied() {
            Some(after) => {
                let name = collection.to_string();
                let head = docs.into_iter().take(after).map(Ok);
                let failure = std::iter::once(Err(MigrateError::pool(
                    "source connection lost",
                    format!("reading collection {}", name),
                )));
                Ok(stream::iter(head.chain(failure)).boxed())
            }
            None => Ok(stream::iter(docs.into_iter().map(Ok)).boxed()),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn store_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}
