//! Relational destinations.
//!
//! A [`Destination`] accepts batches of transformed records and commits each call
//! atomically: either every record of the call is stored or none is. Failures are
//! split into record-level rejections ([`MigrateError::Rejected`]), which the batch
//! writer isolates by bisection, and transport failures, which end the run.

mod memory;
mod mysql;

pub use memory::{Constraint, MemoryDestination};
pub use mysql::MysqlDestination;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::TargetConfig;
use crate::entity::EntityDef;
use crate::error::{MigrateError, Result};
use crate::plan::MigrationJob;
use crate::value::TransformedRecord;

/// What to do when an inserted primary key already exists: keep the existing
/// row and overwrite only `update_columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictPolicy {
    pub update_columns: &'static [&'static str],
}

impl ConflictPolicy {
    /// Policy for an entity type: update its mutable columns.
    pub fn for_entity(def: &EntityDef) -> Self {
        Self {
            update_columns: def.mutable_columns,
        }
    }
}

/// Destination table for one entity type.
#[derive(Debug, Clone)]
pub struct TableSpec {
    /// Table name.
    pub table: String,
    /// Mapping row describing the columns.
    pub def: &'static EntityDef,
}

impl TableSpec {
    pub fn for_job(job: &MigrationJob) -> Self {
        Self {
            table: job.table.clone(),
            def: job.entity.definition(),
        }
    }
}

/// Write access to a relational store.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Create missing tables. Existing tables are left untouched.
    async fn ensure_schema(&self, tables: &[TableSpec]) -> Result<()>;

    /// Insert records into `table` as one atomic unit.
    ///
    /// Returns the number of records committed.
    async fn execute_batch(
        &self,
        table: &str,
        records: &[TransformedRecord],
        conflict: ConflictPolicy,
    ) -> Result<u64>;

    /// Number of rows currently in `table`.
    async fn row_count(&self, table: &str) -> Result<u64>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Database type identifier (e.g., "mysql").
    fn db_type(&self) -> &str;

    /// Release connections.
    async fn close(&self);
}

/// Connect to the destination described by the configuration.
pub async fn connect(config: &TargetConfig) -> Result<Arc<dyn Destination>> {
    match config.r#type.as_str() {
        "mysql" => Ok(Arc::new(
            MysqlDestination::new(config, config.get_max_connections()).await?,
        )),
        other => Err(MigrateError::Config(format!(
            "unsupported target type '{}'",
            other
        ))),
    }
}
