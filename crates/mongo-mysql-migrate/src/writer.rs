//! Batch writer with failure isolation.
//!
//! A batch is first offered to the destination whole. When the destination
//! rejects it, the failing range is split in two and each half retried, until
//! the offending records are isolated and dropped. Ranges live on an explicit
//! worklist, so the number of attempts for `n` records never exceeds `2n - 1`.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::entity::EntityType;
use crate::error::{MigrateError, Result};
use crate::plan::MigrationJob;
use crate::source::RawDocument;
use crate::target::{ConflictPolicy, Destination};
use crate::value::TransformedRecord;

/// A record that could not be migrated.
#[derive(Debug, Clone, Serialize)]
pub struct DroppedRecord {
    pub entity: EntityType,
    pub table: String,
    /// Identifier of the source document, if it had one.
    pub original_id: Option<String>,
    /// Identifier minted for the record; absent when it failed before minting completed.
    pub new_id: Option<String>,
    pub reason: String,
    /// Full record (transformed row, or the raw document when transformation failed).
    pub payload: Value,
}

impl DroppedRecord {
    /// A transformed record the destination refused.
    pub fn from_record(table: &str, record: &TransformedRecord, reason: impl ToString) -> Self {
        Self {
            entity: record.entity,
            table: table.to_string(),
            original_id: record.original_id.clone(),
            new_id: Some(record.id.clone()),
            reason: reason.to_string(),
            payload: record.to_json(),
        }
    }

    /// A source document the transformer refused.
    pub fn from_document(job: &MigrationJob, raw: &RawDocument, err: &MigrateError) -> Self {
        Self {
            entity: job.entity,
            table: job.table.clone(),
            original_id: raw
                .get(crate::entity::SOURCE_ID_FIELD)
                .and_then(crate::transform::normalize::normalize_id),
            new_id: None,
            reason: err.to_string(),
            payload: Value::Object(raw.clone()),
        }
    }
}

/// Result of committing one batch.
#[derive(Debug, Default)]
pub struct CommitOutcome {
    /// Records committed.
    pub written: u64,
    /// Records isolated as unwritable.
    pub dropped: Vec<DroppedRecord>,
    /// Destination calls made.
    pub attempts: u64,
    /// Deepest split level reached (0 = the whole batch went through).
    pub max_depth: u32,
}

/// Commits batches to a destination, isolating rejected records.
#[derive(Clone)]
pub struct BatchWriter {
    destination: Arc<dyn Destination>,
}

impl BatchWriter {
    pub fn new(destination: Arc<dyn Destination>) -> Self {
        Self { destination }
    }

    /// Commit `batch` into the job's table.
    ///
    /// Record-level rejections are bisected: a failing range of more than one
    /// record is split into two near-equal halves, the first half tried first; a
    /// failing single record is dropped. Any other error aborts immediately.
    pub async fn commit(
        &self,
        job: &MigrationJob,
        batch: &[TransformedRecord],
    ) -> Result<CommitOutcome> {
        let mut outcome = CommitOutcome::default();
        if batch.is_empty() {
            return Ok(outcome);
        }

        let conflict = ConflictPolicy::for_entity(job.entity.definition());

        // Stack of (start, end, depth); the second half is pushed first so the
        // first half is processed first.
        let mut worklist = vec![(0usize, batch.len(), 0u32)];

        while let Some((start, end, depth)) = worklist.pop() {
            let range = &batch[start..end];
            outcome.attempts += 1;
            outcome.max_depth = outcome.max_depth.max(depth);

            match self
                .destination
                .execute_batch(&job.table, range, conflict)
                .await
            {
                Ok(written) => outcome.written += written,
                Err(e) if e.is_record_level() => {
                    if range.len() == 1 {
                        let dropped = DroppedRecord::from_record(&job.table, &range[0], &e);
                        warn!(
                            "{}: dropped record {} (source id {}): {}",
                            job.table,
                            range[0].id,
                            dropped.original_id.as_deref().unwrap_or("<none>"),
                            e
                        );
                        outcome.dropped.push(dropped);
                    } else {
                        let mid = start + range.len().div_ceil(2);
                        debug!(
                            "{}: batch [{}, {}) rejected, splitting at {}",
                            job.table, start, end, mid
                        );
                        worklist.push((mid, end, depth + 1));
                        worklist.push((start, mid, depth + 1));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "{}: committed {} of {} records in {} attempts",
            job.table,
            outcome.written,
            batch.len(),
            outcome.attempts
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MemoryDestination;
    use crate::value::SqlValue;

    fn job() -> MigrationJob {
        MigrationJob {
            entity: EntityType::Sensor,
            collection: "sensors".into(),
            table: "sensors".into(),
            ordinal: 0,
        }
    }

    fn sensors(n: usize) -> Vec<TransformedRecord> {
        let width = EntityType::Sensor.definition().columns().len();
        (0..n)
            .map(|i| {
                let id = format!("new-{:04}", i);
                let mut values = vec![SqlValue::Null; width];
                values[0] = SqlValue::from(id.as_str());
                values[1] = SqlValue::from(format!("sensor {}", i));
                TransformedRecord {
                    entity: EntityType::Sensor,
                    original_id: Some(format!("orig-{:04}", i)),
                    id,
                    values,
                }
            })
            .collect()
    }

    fn rejecting(bad: &'static [&'static str]) -> MemoryDestination {
        MemoryDestination::new().with_constraint("sensors", move |r| {
            if bad.contains(&r.id.as_str()) {
                Err("check constraint violated".into())
            } else {
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_clean_batch_single_attempt() {
        let dest = MemoryDestination::new();
        let writer = BatchWriter::new(Arc::new(dest.clone()));
        let outcome = writer.commit(&job(), &sensors(100)).await.unwrap();

        assert_eq!(outcome.written, 100);
        assert!(outcome.dropped.is_empty());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.max_depth, 0);
    }

    #[tokio::test]
    async fn test_single_bad_record_isolated() {
        let dest = rejecting(&["new-0500"]);
        let writer = BatchWriter::new(Arc::new(dest.clone()));
        let batch = sensors(1000);
        let outcome = writer.commit(&job(), &batch).await.unwrap();

        assert_eq!(outcome.written, 999);
        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(outcome.dropped[0].new_id.as_deref(), Some("new-0500"));
        assert_eq!(outcome.dropped[0].original_id.as_deref(), Some("orig-0500"));
        assert_eq!(outcome.dropped[0].payload["name"], "sensor 500");
        assert!(outcome.attempts <= 2 * 1000 - 1);
        assert_eq!(outcome.max_depth, 10);
        assert_eq!(dest.row_count("sensors").await.unwrap(), 999);
    }

    #[tokio::test]
    async fn test_k_bad_records_give_k_drops() {
        let bad: &'static [&'static str] = &["new-0000", "new-0007", "new-0031", "new-0063"];
        let dest = rejecting(bad);
        let writer = BatchWriter::new(Arc::new(dest.clone()));
        let outcome = writer.commit(&job(), &sensors(64)).await.unwrap();

        let mut dropped: Vec<_> = outcome
            .dropped
            .iter()
            .filter_map(|d| d.new_id.clone())
            .collect();
        dropped.sort();
        assert_eq!(dropped, bad.to_vec());
        assert_eq!(outcome.written, 60);
        assert!(outcome.attempts <= 2 * 64 - 1);
    }

    #[tokio::test]
    async fn test_all_bad_hits_attempt_bound() {
        let dest = MemoryDestination::new().with_constraint("sensors", |_| Err("nope".into()));
        let writer = BatchWriter::new(Arc::new(dest.clone()));
        let outcome = writer.commit(&job(), &sensors(8)).await.unwrap();

        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.dropped.len(), 8);
        assert_eq!(outcome.attempts, 15);
        assert_eq!(dest.attempts(), 15);
    }

    #[tokio::test]
    async fn test_first_half_committed_first() {
        let dest = rejecting(&["new-0003"]);
        let writer = BatchWriter::new(Arc::new(dest.clone()));
        writer.commit(&job(), &sensors(7)).await.unwrap();

        let ids: Vec<String> = dest.rows("sensors").into_iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec!["new-0000", "new-0001", "new-0002", "new-0004", "new-0005", "new-0006"]
        );
    }

    #[tokio::test]
    async fn test_fatal_error_aborts() {
        let dest = MemoryDestination::new();
        dest.fail_transport_on("sensors");
        let writer = BatchWriter::new(Arc::new(dest.clone()));
        let err = writer.commit(&job(), &sensors(10)).await.unwrap_err();

        assert!(matches!(err, MigrateError::Pool { .. }));
        assert_eq!(dest.attempts(), 1);
    }

    #[tokio::test]
    async fn test_recommit_is_idempotent() {
        let dest = MemoryDestination::new();
        let writer = BatchWriter::new(Arc::new(dest.clone()));
        let batch = sensors(20);
        writer.commit(&job(), &batch).await.unwrap();
        let again = writer.commit(&job(), &batch).await.unwrap();

        assert_eq!(again.written, 20);
        assert_eq!(dest.row_count("sensors").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_attempt() {
        let dest = MemoryDestination::new();
        let writer = BatchWriter::new(Arc::new(dest.clone()));
        let outcome = writer.commit(&job(), &[]).await.unwrap();
        assert_eq!(outcome.attempts, 0);
        assert_eq!(dest.attempts(), 0);
    }
}
