//! In-process destination.
//!
//! Tables are maps keyed by primary key. Per-table constraints can reject
//! records, which makes the store useful for exercising the batch writer, and
//! the same type backs dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ConflictPolicy, Destination, TableSpec};
use crate::error::{MigrateError, Result};
use crate::value::TransformedRecord;

/// Row check applied before a batch is stored. `Err` carries the rejection reason.
pub type Constraint =
    Arc<dyn Fn(&TransformedRecord) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Default)]
struct Table {
    rows: Vec<TransformedRecord>,
    index: HashMap<String, usize>,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Table>,
    created: Vec<String>,
    attempts: u64,
    transport_failure: Option<String>,
}

/// Destination holding tables in memory.
#[derive(Clone, Default)]
pub struct MemoryDestination {
    state: Arc<Mutex<State>>,
    constraints: Arc<Mutex<HashMap<String, Vec<Constraint>>>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any record of `table` for which `check` returns an error.
    pub fn with_constraint<F>(self, table: impl Into<String>, check: F) -> Self
    where
        F: Fn(&TransformedRecord) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.lock_constraints()
            .entry(table.into())
            .or_default()
            .push(Arc::new(check));
        self
    }

    /// Fail every subsequent batch on `table`, and any schema setup that
    /// includes it, with a transport error.
    pub fn fail_transport_on(&self, table: impl Into<String>) {
        self.lock().transport_failure = Some(table.into());
    }

    /// Number of `execute_batch` calls so far, successful or not.
    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    /// Rows of a table in first-insert order.
    pub fn rows(&self, table: &str) -> Vec<TransformedRecord> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// A row by primary key.
    pub fn row(&self, table: &str, id: &str) -> Option<TransformedRecord> {
        let state = self.lock();
        let table = state.tables.get(table)?;
        table.index.get(id).map(|&i| table.rows[i].clone())
    }

    /// Tables created through `ensure_schema`, in creation order.
    pub fn created_tables(&self) -> Vec<String> {
        self.lock().created.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_constraints(&self) -> MutexGuard<'_, HashMap<String, Vec<Constraint>>> {
        self.constraints.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, table: &str, records: &[TransformedRecord]) -> Result<()> {
        let constraints = self.lock_constraints();
        let Some(checks) = constraints.get(table) else {
            return Ok(());
        };
        for record in records {
            for check in checks {
                check(record).map_err(|reason| {
                    MigrateError::rejected(table, format!("record {}: {}", record.id, reason))
                })?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn ensure_schema(&self, tables: &[TableSpec]) -> Result<()> {
        let mut state = self.lock();
        if let Some(table) = state.transport_failure.as_deref() {
            if tables.iter().any(|entry| entry.table == table) {
                return Err(MigrateError::pool(
                    "connection reset by peer",
                    format!("creating table {}", table),
                ));
            }
        }
        for entry in tables {
            if !state.tables.contains_key(&entry.table) {
                state.tables.insert(entry.table.clone(), Table::default());
                state.created.push(entry.table.clone());
            }
        }
        Ok(())
    }

    async fn execute_batch(
        &self,
        table: &str,
        records: &[TransformedRecord],
        conflict: ConflictPolicy,
    ) -> Result<u64> {
        {
            let mut state = self.lock();
            state.attempts += 1;
            if state.transport_failure.as_deref() == Some(table) {
                return Err(MigrateError::pool(
                    "connection reset by peer",
                    format!("writing batch to {}", table),
                ));
            }
        }

        if records.is_empty() {
            return Ok(0);
        }

        // Validate everything first so a rejected batch leaves no trace.
        self.check(table, records)?;

        let mut state = self.lock();
        let target = state.tables.entry(table.to_string()).or_default();

        for record in records {
            match target.index.get(&record.id).copied() {
                Some(pos) => {
                    let existing = &mut target.rows[pos];
                    for (i, column) in record.columns().into_iter().enumerate() {
                        if conflict.update_columns.contains(&column) {
                            existing.values[i] = record.values[i].clone();
                        }
                    }
                }
                None => {
                    target.index.insert(record.id.clone(), target.rows.len());
                    target.rows.push(record.clone());
                }
            }
        }

        Ok(records.len() as u64)
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .unwrap_or(0))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use crate::value::SqlValue;

    fn reading(id: &str, value: i64) -> TransformedRecord {
        let mut values = vec![SqlValue::Null; EntityType::SensorData.definition().columns().len()];
        values[0] = SqlValue::from(id);
        let mut record = TransformedRecord {
            entity: EntityType::SensorData,
            original_id: Some(format!("o-{}", id)),
            id: id.to_string(),
            values,
        };
        let pos = record.columns().iter().position(|c| *c == "value").unwrap();
        record.values[pos] = SqlValue::Int(value);
        record
    }

    fn upsert() -> ConflictPolicy {
        ConflictPolicy::for_entity(EntityType::SensorData.definition())
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let dest = MemoryDestination::new().with_constraint("sensorsdata", |r| {
            match r.get("value") {
                Some(SqlValue::Int(v)) if *v < 0 => Err("negative value".into()),
                _ => Ok(()),
            }
        });

        let batch = vec![reading("a", 1), reading("b", -1), reading("c", 3)];
        let err = dest
            .execute_batch("sensorsdata", &batch, upsert())
            .await
            .unwrap_err();
        assert!(err.is_record_level());
        assert_eq!(dest.row_count("sensorsdata").await.unwrap(), 0);
        assert_eq!(dest.attempts(), 1);
    }

    #[tokio::test]
    async fn test_conflict_updates_mutable_columns_only() {
        let dest = MemoryDestination::new();
        dest.execute_batch("sensorsdata", &[reading("a", 1)], upsert())
            .await
            .unwrap();

        let mut again = reading("a", 42);
        let minute = again.columns().iter().position(|c| *c == "minute").unwrap();
        again.values[minute] = SqlValue::Int(59);
        dest.execute_batch("sensorsdata", &[again], upsert())
            .await
            .unwrap();

        assert_eq!(dest.row_count("sensorsdata").await.unwrap(), 1);
        let row = dest.row("sensorsdata", "a").unwrap();
        assert_eq!(row.get("value"), Some(&SqlValue::Int(42)));
        assert_eq!(row.get("minute"), Some(&SqlValue::Null));
    }

    #[tokio::test]
    async fn test_duplicate_within_batch_is_upserted() {
        let dest = MemoryDestination::new();
        let written = dest
            .execute_batch("sensorsdata", &[reading("a", 1), reading("a", 2)], upsert())
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(dest.row_count("sensorsdata").await.unwrap(), 1);
        let row = dest.row("sensorsdata", "a").unwrap();
        assert_eq!(row.get("value"), Some(&SqlValue::Int(2)));
    }

    #[tokio::test]
    async fn test_transport_failure_is_fatal() {
        let dest = MemoryDestination::new();
        dest.fail_transport_on("sensorsdata");
        let err = dest
            .execute_batch("sensorsdata", &[reading("a", 1)], upsert())
            .await
            .unwrap_err();
        assert!(!err.is_record_level());
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let dest = MemoryDestination::new();
        let specs = vec![TableSpec {
            table: "zones".into(),
            def: EntityType::Zone.definition(),
        }];
        dest.ensure_schema(&specs).await.unwrap();
        dest.ensure_schema(&specs).await.unwrap();
        assert_eq!(dest.created_tables(), vec!["zones".to_string()]);

        dest.fail_transport_on("zones");
        assert!(dest.ensure_schema(&specs).await.is_err());
    }
}
