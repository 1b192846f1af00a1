//! MongoDB source store.

use async_trait::async_trait;
use futures::stream::StreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, Collection};
use serde_json::Value;
use tracing::info;

use super::{DocumentStream, RawDocument, SourceStore};
use crate::config::SourceConfig;
use crate::error::{MigrateError, Result};

/// Read-only MongoDB client bound to one database.
pub struct MongoSource {
    client: Client,
    database: String,
}

impl MongoSource {
    /// Connect and verify the server answers a ping.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.uri).await?;
        client
            .database(&config.database)
            .run_command(doc! { "ping": 1 })
            .await?;

        info!(
            "Connected to MongoDB source: {} (database {})",
            config.redacted_uri(),
            config.database
        );

        Ok(Self {
            client,
            database: config.database.clone(),
        })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.client.database(&self.database).collection(name)
    }
}

/// Render a BSON document as relaxed Extended JSON.
fn to_raw(document: Document) -> Result<RawDocument> {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => Ok(map),
        other => Err(MigrateError::pool(
            format!("expected a document, got {}", other),
            "converting MongoDB document",
        )),
    }
}

#[async_trait]
impl SourceStore for MongoSource {
    async fn count(&self, collection: &str) -> Result<u64> {
        Ok(self.collection(collection).count_documents(doc! {}).await?)
    }

    async fn open_cursor(&self, collection: &str, batch_size: usize) -> Result<DocumentStream> {
        let cursor = self
            .collection(collection)
            .find(doc! {})
            .batch_size(u32::try_from(batch_size).unwrap_or(u32::MAX))
            .await?;

        Ok(cursor
            .map(|item| item.map_err(MigrateError::from).and_then(to_raw))
            .boxed())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    fn store_type(&self) -> &str {
        "mongodb"
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn test_to_raw_uses_relaxed_extended_json() {
        let oid = ObjectId::parse_str("65f1c0ffee0000000000abcd").unwrap();
        let raw = to_raw(doc! {
            "_id": oid,
            "value": 21_i32,
            "big": 9_007_199_254_740_993_i64,
            "name": "gateway",
        })
        .unwrap();

        assert_eq!(raw["_id"]["$oid"], "65f1c0ffee0000000000abcd");
        assert_eq!(raw["value"], 21);
        assert_eq!(raw["name"], "gateway");
        assert!(raw.contains_key("big"));
    }
}
