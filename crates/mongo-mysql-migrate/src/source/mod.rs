//! Source document stores and the per-collection reader.
//!
//! A [`SourceStore`] exposes the narrow protocol the engine needs: a document
//! count and a forward-only cursor per collection. [`SourceReader`] wraps a store
//! and streams one collection through a bounded channel so that source I/O runs
//! ahead of transformation by at most one batch.

mod json_dir;
mod memory;
mod mongo;

pub use json_dir::JsonDirSource;
pub use memory::MemorySource;
pub use mongo::MongoSource;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::{MigrateError, Result};
use crate::plan::MigrationJob;

/// Schema-less source document (MongoDB relaxed Extended JSON object).
pub type RawDocument = serde_json::Map<String, serde_json::Value>;

/// Forward-only stream of documents from one collection.
pub type DocumentStream = BoxStream<'static, Result<RawDocument>>;

/// Read-only access to a document store.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Number of documents in a collection right now.
    async fn count(&self, collection: &str) -> Result<u64>;

    /// Open a cursor over every document of a collection, from the start.
    async fn open_cursor(&self, collection: &str, batch_size: usize) -> Result<DocumentStream>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Store type identifier (e.g., "mongodb").
    fn store_type(&self) -> &str;

    /// Release connections.
    async fn close(&self);
}

/// Connect to the source store described by the configuration.
pub async fn connect(config: &SourceConfig) -> Result<Arc<dyn SourceStore>> {
    match config.r#type.as_str() {
        "mongodb" => Ok(Arc::new(MongoSource::connect(config).await?)),
        "json_dir" => {
            let path = config.path.clone().ok_or_else(|| {
                MigrateError::Config("source.path is required for json_dir sources".into())
            })?;
            Ok(Arc::new(JsonDirSource::open(path)?))
        }
        other => Err(MigrateError::Config(format!(
            "unsupported source type '{}'",
            other
        ))),
    }
}

/// Opens collections for migration jobs with bounded read-ahead.
#[derive(Clone)]
pub struct SourceReader {
    store: Arc<dyn SourceStore>,
    batch_size: usize,
}

impl SourceReader {
    pub fn new(store: Arc<dyn SourceStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Open the job's collection.
    ///
    /// The total is counted before iteration starts. A background task pulls
    /// documents into a channel holding at most `batch_size` documents; it stops
    /// after the first error or when the cursor is dropped.
    pub async fn open(&self, job: &MigrationJob) -> Result<DocumentCursor> {
        let total = self.store.count(&job.collection).await?;
        let mut stream = self
            .store
            .open_cursor(&job.collection, self.batch_size)
            .await?;

        let (tx, rx) = mpsc::channel(self.batch_size);
        let collection = job.collection.clone();

        let handle = tokio::spawn(async move {
            let mut pulled = 0u64;
            while let Some(item) = stream.next().await {
                let failed = item.is_err();
                if tx.send(item).await.is_err() {
                    break;
                }
                if failed {
                    break;
                }
                pulled += 1;
            }
            debug!("{}: reader finished after {} documents", collection, pulled);
        });

        debug!(
            "{}: opened cursor ({} documents, read-ahead {})",
            job.collection, total, self.batch_size
        );

        Ok(DocumentCursor {
            total,
            received: 0,
            rx,
            handle,
        })
    }
}

/// Lazy sequence of documents for one collection.
pub struct DocumentCursor {
    total: u64,
    received: u64,
    rx: mpsc::Receiver<Result<RawDocument>>,
    handle: JoinHandle<()>,
}

impl DocumentCursor {
    /// Document count at open time.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Documents handed out so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Next document, or `None` when the collection is exhausted.
    pub async fn next(&mut self) -> Option<Result<RawDocument>> {
        let item = self.rx.recv().await;
        if matches!(item, Some(Ok(_))) {
            self.received += 1;
        }
        item
    }

    /// Pull up to `max` documents. An empty vector means the cursor is exhausted.
    pub async fn next_chunk(&mut self, max: usize) -> Result<Vec<RawDocument>> {
        let mut docs = Vec::with_capacity(max);
        while docs.len() < max {
            match self.next().await {
                Some(item) => docs.push(item?),
                None => break,
            }
        }
        Ok(docs)
    }
}

impl Drop for DocumentCursor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use serde_json::json;

    fn job(collection: &str) -> MigrationJob {
        MigrationJob {
            entity: EntityType::Account,
            collection: collection.to_string(),
            table: "accounts".to_string(),
            ordinal: 0,
        }
    }

    fn source(n: usize) -> MemorySource {
        MemorySource::new().with_values(
            "accounts",
            (0..n).map(|i| json!({"_id": format!("a{}", i)})).collect(),
        )
    }

    #[tokio::test]
    async fn test_cursor_reports_total_and_yields_in_order() {
        let reader = SourceReader::new(Arc::new(source(5)), 2);
        let mut cursor = reader.open(&job("accounts")).await.unwrap();
        assert_eq!(cursor.total(), 5);

        let first = cursor.next_chunk(2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0]["_id"], "a0");
        let rest = cursor.next_chunk(10).await.unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[2]["_id"], "a4");
        assert!(cursor.next_chunk(10).await.unwrap().is_empty());
        assert_eq!(cursor.received(), 5);
    }

    #[tokio::test]
    async fn test_reopen_restarts_from_beginning() {
        let reader = SourceReader::new(Arc::new(source(3)), 10);
        let mut cursor = reader.open(&job("accounts")).await.unwrap();
        cursor.next().await.unwrap().unwrap();
        drop(cursor);

        let mut cursor = reader.open(&job("accounts")).await.unwrap();
        let doc = cursor.next().await.unwrap().unwrap();
        assert_eq!(doc["_id"], "a0");
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let reader = SourceReader::new(Arc::new(MemorySource::new()), 10);
        let mut cursor = reader.open(&job("nothing")).await.unwrap();
        assert_eq!(cursor.total(), 0);
        assert!(cursor.next().await.is_none());
    }

    #[tokio::test]
    async fn test_source_error_surfaces_and_stops() {
        let store = source(4).with_failure_after("accounts", 2);
        let reader = SourceReader::new(Arc::new(store), 10);
        let mut cursor = reader.open(&job("accounts")).await.unwrap();
        let err = cursor.next_chunk(10).await.unwrap_err();
        assert!(!err.is_record_level());
        assert!(cursor.next().await.is_none());
    }
}
