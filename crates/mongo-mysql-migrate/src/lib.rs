//! # mongo-mysql-migrate
//!
//! MongoDB to MySQL migration library.
//!
//! Documents from a fixed set of collections are transformed into relational
//! rows. Every primary key is re-minted as a UUID and every foreign key is
//! rewritten to point at the new identifier of the referenced document:
//!
//! - **Dependency-ordered plan** validated at startup (no cycles, no gaps)
//! - **Identifier registry** mapping original ids to new ids per entity type
//! - **Batch writes with failure isolation** by bounded bisection
//! - **Drop audit** recording every record that could not be migrated
//!
//! ## Example
//!
//! ```rust,no_run
//! use mongo_mysql_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mongo_mysql_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(CancellationToken::new(), false).await?;
//!     println!("Migrated {} records", result.records_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod registry;
pub mod source;
pub mod target;
pub mod transform;
pub mod value;
pub mod writer;

// Re-exports for convenient access
pub use config::{Config, EntityJobConfig, MigrationConfig, SourceConfig, TargetConfig};
pub use entity::{CompositeIndex, EntityDef, EntityType, FieldKind, FieldRule};
pub use error::{MigrateError, Result};
pub use orchestrator::{
    EntityStatus, EntitySummary, HealthCheckResult, MigrationResult, Orchestrator, RunStatus,
    TableValidation,
};
pub use plan::{MigrationJob, MigrationPlan};
pub use progress::{DropAudit, ProgressUpdate};
pub use registry::{IdMinter, IdStrategy, IdentifierRegistry};
pub use source::{JsonDirSource, MemorySource, MongoSource, RawDocument, SourceReader, SourceStore};
pub use target::{ConflictPolicy, Destination, MemoryDestination, MysqlDestination, TableSpec};
pub use transform::{Transformed, Transformer, UnresolvedPolicy};
pub use value::{Batch, SqlValue, TransformedRecord};
pub use writer::{BatchWriter, CommitOutcome, DroppedRecord};
