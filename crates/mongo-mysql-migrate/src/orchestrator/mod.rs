//! Migration orchestrator - main workflow coordinator.
//!
//! Entity types are migrated strictly one after another in plan order, so every
//! foreign key is resolved against identifiers registered by earlier types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::entity::EntityType;
use crate::error::{MigrateError, Result, EXIT_PARTIAL};
use crate::plan::{MigrationJob, MigrationPlan};
use crate::progress::{DropAudit, ProgressReporter, ProgressUpdate};
use crate::registry::{IdMinter, IdentifierRegistry};
use crate::source::{self, SourceReader, SourceStore};
use crate::target::{self, Destination, MemoryDestination, TableSpec};
use crate::transform::Transformer;
use crate::value::Batch;
use crate::writer::{BatchWriter, DroppedRecord};

/// Lifecycle of one entity type within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Pending,
    Reading,
    Writing,
    /// Every document was written.
    Done,
    /// Finished, but some records were dropped.
    Partial,
    /// Stopped by a fatal error.
    Failed,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    InProgress,
    Completed,
    Partial,
    Failed,
}

/// Per-entity tallies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySummary {
    pub entity: EntityType,
    pub collection: String,
    pub table: String,
    pub status: EntityStatus,

    /// Documents in the collection when it was opened.
    pub total: u64,

    /// Documents read and handled.
    pub processed: u64,

    /// Records committed to the destination.
    pub written: u64,

    /// Records dropped (rejected by the transformer or the destination).
    pub dropped: u64,

    /// Foreign keys replaced by placeholder identifiers.
    pub placeholders: u64,

    /// Original identifiers registered for this type.
    pub identifiers: usize,

    /// Batches committed.
    pub batches: u64,

    /// Destination calls, including bisection retries.
    pub attempts: u64,

    pub elapsed_secs: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntitySummary {
    fn pending(job: &MigrationJob) -> Self {
        Self {
            entity: job.entity,
            collection: job.collection.clone(),
            table: job.table.clone(),
            status: EntityStatus::Pending,
            total: 0,
            processed: 0,
            written: 0,
            dropped: 0,
            placeholders: 0,
            identifiers: 0,
            batches: 0,
            attempts: 0,
            elapsed_secs: 0.0,
            error: None,
        }
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    /// Whether this was a dry run against an in-memory destination.
    pub dry_run: bool,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Per-entity tallies, in plan order.
    pub entities: Vec<EntitySummary>,

    pub documents_processed: u64,
    pub records_written: u64,
    pub records_dropped: u64,

    /// Identifier mappings registered during the run.
    pub identifiers_registered: usize,

    /// Fatal error, if the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Process exit code for the failure, if the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u8>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            RunStatus::Completed | RunStatus::NotStarted | RunStatus::InProgress => 0,
            RunStatus::Partial => EXIT_PARTIAL,
            RunStatus::Failed => self.error_code.unwrap_or(1),
        }
    }

    /// Summary for one entity type.
    pub fn entity(&self, entity: EntityType) -> Option<&EntitySummary> {
        self.entities.iter().find(|e| e.entity == entity)
    }
}

/// Source count versus destination row count for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableValidation {
    pub entity: EntityType,
    pub collection: String,
    pub table: String,
    pub source_count: u64,
    pub target_count: u64,
    pub matches: bool,
}

/// Connectivity of both stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_type: String,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_type: String,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    plan: MigrationPlan,
    source: Arc<dyn SourceStore>,
    destination: Arc<dyn Destination>,
    progress: ProgressReporter,
}

/// Mutable state threaded through one run.
struct RunContext<'a> {
    reader: SourceReader,
    writer: BatchWriter,
    transformer: Transformer,
    registry: IdentifierRegistry,
    audit: DropAudit,
    cancel: &'a CancellationToken,
}

impl Orchestrator {
    /// Validate the configuration and connect to both stores.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let source = source::connect(&config.source).await?;
        let destination = target::connect(&config.target).await?;
        Self::from_parts(config, source, destination)
    }

    /// Validate the configuration and connect to the source only; writes go to
    /// an in-memory destination.
    pub async fn new_dry_run(config: Config) -> Result<Self> {
        config.validate()?;
        let source = source::connect(&config.source).await?;
        Self::from_parts(config, source, Arc::new(MemoryDestination::new()))
    }

    /// Validate the configuration and build from already connected stores.
    pub fn from_parts(
        config: Config,
        source: Arc<dyn SourceStore>,
        destination: Arc<dyn Destination>,
    ) -> Result<Self> {
        config.validate()?;
        let plan = MigrationPlan::from_config(&config.migration)?;
        Ok(Self {
            config,
            plan,
            source,
            destination,
            progress: ProgressReporter::default(),
        })
    }

    /// Send a [`ProgressUpdate`] after every committed batch.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        self.progress = ProgressReporter::new(Some(tx));
        self
    }

    /// The validated migration plan.
    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }

    /// Run the migration.
    ///
    /// Record-level failures never fail the run; they are dropped, audited and
    /// counted, and the run ends `partial`. Fatal errors and cancellation end it
    /// `failed`, including errors while preparing the destination or the drop
    /// log; entities that never started stay `pending`.
    pub async fn run(self, cancel: CancellationToken, dry_run: bool) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        let destination: Arc<dyn Destination> = if dry_run {
            Arc::new(MemoryDestination::new())
        } else {
            self.destination.clone()
        };

        info!(
            "Starting migration run: {}{}",
            run_id,
            if dry_run { " (dry run)" } else { "" }
        );

        let mut entities: Vec<EntitySummary> =
            self.plan.jobs().iter().map(EntitySummary::pending).collect();

        let order: Vec<&str> = self.plan.jobs().iter().map(|j| j.entity.as_str()).collect();
        info!("Phase 1: Plan ({})", order.join(" -> "));

        let mut failure: Option<MigrateError> = None;
        let mut identifiers_registered = 0;

        match self.prepare(&destination, &cancel).await {
            Ok(mut ctx) => {
                info!("Phase 3: Migrating {} entity types", entities.len());

                for (job, summary) in self.plan.jobs().iter().zip(entities.iter_mut()) {
                    let entity_start = Instant::now();
                    let outcome = self.migrate_entity(job, summary, &mut ctx).await;
                    summary.elapsed_secs = entity_start.elapsed().as_secs_f64();
                    summary.identifiers = ctx.registry.count_for(job.entity);

                    if let Err(e) = outcome {
                        error!("{}: failed: {}", job.entity, e);
                        summary.status = EntityStatus::Failed;
                        summary.error = Some(e.to_string());
                        failure = Some(e);
                        break;
                    }
                }

                if let Err(e) = ctx.audit.flush().await {
                    warn!("Failed to flush drop log: {}", e);
                }
                if let Some(path) = ctx.audit.path().filter(|_| ctx.audit.recorded() > 0) {
                    info!(
                        "{} dropped records written to {}",
                        ctx.audit.recorded(),
                        path.display()
                    );
                }
                identifiers_registered = ctx.registry.len();
            }
            Err(e) => {
                error!("Migration setup failed: {}", e);
                failure = Some(e);
            }
        }

        let documents_processed = entities.iter().map(|e| e.processed).sum();
        let records_written = entities.iter().map(|e| e.written).sum();
        let records_dropped = entities.iter().map(|e| e.dropped).sum();

        let status = match &failure {
            Some(_) => RunStatus::Failed,
            None if records_dropped > 0 => RunStatus::Partial,
            None => RunStatus::Completed,
        };

        let result = MigrationResult {
            run_id,
            status,
            dry_run,
            duration_seconds: start.elapsed().as_secs_f64(),
            started_at,
            completed_at: Utc::now(),
            entities,
            documents_processed,
            records_written,
            records_dropped,
            identifiers_registered,
            error: failure.as_ref().map(|e| e.to_string()),
            error_code: failure.as_ref().map(|e| e.exit_code()),
        };

        info!(
            "Migration {:?}: {} documents, {} written, {} dropped in {:.1}s",
            result.status,
            result.documents_processed,
            result.records_written,
            result.records_dropped,
            result.duration_seconds
        );

        if !dry_run {
            self.source.close().await;
            self.destination.close().await;
        }

        Ok(result)
    }

    /// Create destination tables and open the drop log.
    async fn prepare<'a>(
        &self,
        destination: &Arc<dyn Destination>,
        cancel: &'a CancellationToken,
    ) -> Result<RunContext<'a>> {
        let migration = &self.config.migration;

        if migration.ensure_schema {
            info!("Phase 2: Ensuring destination tables");
            let specs: Vec<TableSpec> = self.plan.jobs().iter().map(TableSpec::for_job).collect();
            destination.ensure_schema(&specs).await?;
        }

        let minter = IdMinter::new(migration.id_strategy);
        let transformer = Transformer::new(minter, migration.unresolved_references);
        info!(
            "Identifiers: {:?}, unresolved references: {:?}",
            minter.strategy(),
            transformer.policy()
        );

        Ok(RunContext {
            reader: SourceReader::new(self.source.clone(), migration.get_batch_size()),
            writer: BatchWriter::new(destination.clone()),
            transformer,
            registry: IdentifierRegistry::new(),
            audit: DropAudit::open(migration.drop_log.as_deref()).await?,
            cancel,
        })
    }

    /// Migrate every document of one entity type.
    async fn migrate_entity(
        &self,
        job: &MigrationJob,
        summary: &mut EntitySummary,
        ctx: &mut RunContext<'_>,
    ) -> Result<()> {
        let start = Instant::now();
        let batch_size = self.config.migration.get_batch_size();

        summary.status = EntityStatus::Reading;
        let mut cursor = ctx.reader.open(job).await?;
        summary.total = cursor.total();

        info!(
            "{}: migrating {} documents from {} into {}",
            job.entity, summary.total, job.collection, job.table
        );

        loop {
            if ctx.cancel.is_cancelled() {
                info!("{}: cancellation requested, stopping", job.entity);
                return Err(MigrateError::Cancelled);
            }

            summary.status = EntityStatus::Reading;
            let docs = cursor.next_chunk(batch_size).await?;
            if docs.is_empty() {
                break;
            }

            let mut batch: Batch = Vec::with_capacity(docs.len());
            for raw in &docs {
                summary.processed += 1;
                match ctx.transformer.transform(raw, job.entity, &mut ctx.registry) {
                    Ok(transformed) => {
                        summary.placeholders += transformed.placeholders as u64;
                        batch.push(transformed.record);
                    }
                    Err(e) if e.is_record_level() => {
                        ctx.audit
                            .record(&DroppedRecord::from_document(job, raw, &e))
                            .await?;
                        summary.dropped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            summary.status = EntityStatus::Writing;
            let outcome = ctx.writer.commit(job, &batch).await?;
            summary.batches += 1;
            summary.attempts += outcome.attempts;
            summary.written += outcome.written;
            for dropped in &outcome.dropped {
                ctx.audit.record(dropped).await?;
            }
            summary.dropped += outcome.dropped.len() as u64;

            debug!(
                "{}: batch {} committed ({} records, {} attempts, depth {})",
                job.entity, summary.batches, outcome.written, outcome.attempts, outcome.max_depth
            );

            self.progress
                .report(ProgressUpdate::new(
                    job.entity,
                    &job.table,
                    summary.processed,
                    summary.total,
                    summary.dropped,
                    start.elapsed().as_secs_f64(),
                ))
                .await;
        }

        debug_assert_eq!(summary.written, summary.processed - summary.dropped);

        if cursor.received() != summary.total {
            warn!(
                "{}: collection changed during migration ({} counted at open, {} read)",
                job.entity,
                summary.total,
                cursor.received()
            );
        }

        summary.status = if summary.dropped > 0 {
            EntityStatus::Partial
        } else {
            EntityStatus::Done
        };

        info!(
            "{}: completed ({} written, {} dropped, {} placeholders) in {:.1}s",
            job.entity,
            summary.written,
            summary.dropped,
            summary.placeholders,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Compare source document counts with destination row counts.
    pub async fn validate(&self) -> Result<Vec<TableValidation>> {
        let mut results = Vec::with_capacity(self.plan.jobs().len());

        for job in self.plan.jobs() {
            let source_count = self.source.count(&job.collection).await?;
            let target_count = self.destination.row_count(&job.table).await.unwrap_or(0);
            let matches = source_count == target_count;

            if matches {
                info!("{}: {} rows (match)", job.table, source_count);
            } else {
                warn!(
                    "{}: source={} target={} (MISMATCH)",
                    job.table, source_count, target_count
                );
            }

            results.push(TableValidation {
                entity: job.entity,
                collection: job.collection.clone(),
                table: job.table.clone(),
                source_count,
                target_count,
                matches,
            });
        }

        Ok(results)
    }

    /// Ping both stores.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let started = Instant::now();
        let source = self.source.ping().await;
        let source_latency_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let target = self.destination.ping().await;
        let target_latency_ms = started.elapsed().as_millis() as u64;

        Ok(HealthCheckResult {
            healthy: source.is_ok() && target.is_ok(),
            source_type: self.source.store_type().to_string(),
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.err().map(|e| e.to_string()),
            target_type: self.destination.db_type().to_string(),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.err().map(|e| e.to_string()),
        })
    }
}
