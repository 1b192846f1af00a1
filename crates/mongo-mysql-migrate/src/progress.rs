//! Progress reporting and the drop audit.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::entity::EntityType;
use crate::error::Result;
use crate::writer::DroppedRecord;

/// Snapshot of one entity type's progress, emitted after every batch.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub entity: EntityType,
    pub table: String,
    /// Documents read and handled so far.
    pub processed: u64,
    /// Documents counted at open time.
    pub total: u64,
    pub dropped: u64,
    pub elapsed_secs: f64,
    pub percent: f64,
}

impl ProgressUpdate {
    pub fn new(
        entity: EntityType,
        table: &str,
        processed: u64,
        total: u64,
        dropped: u64,
        elapsed_secs: f64,
    ) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            (processed as f64 / total as f64 * 100.0).min(100.0)
        };
        Self {
            entity,
            table: table.to_string(),
            processed,
            total,
            dropped,
            elapsed_secs,
            percent,
        }
    }
}

/// Logs progress and forwards it to an optional listener.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl ProgressReporter {
    pub fn new(tx: Option<mpsc::Sender<ProgressUpdate>>) -> Self {
        Self { tx }
    }

    /// Report one update. A closed listener is ignored.
    pub async fn report(&self, update: ProgressUpdate) {
        info!(
            "{}: {}/{} ({:.1}%), {} dropped, {:.1}s elapsed",
            update.table,
            update.processed,
            update.total,
            update.percent,
            update.dropped,
            update.elapsed_secs
        );
        if let Some(tx) = &self.tx {
            if tx.send(update).await.is_err() {
                debug!("progress listener closed");
            }
        }
    }
}

/// Sink for dropped records: every drop is logged, and optionally appended to a
/// JSON Lines file.
#[derive(Debug)]
pub struct DropAudit {
    path: Option<PathBuf>,
    file: Option<File>,
    recorded: u64,
}

impl DropAudit {
    /// Audit that only logs.
    pub fn log_only() -> Self {
        Self {
            path: None,
            file: None,
            recorded: 0,
        }
    }

    /// Audit that also appends to `path`, creating it if needed.
    pub async fn open(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::log_only());
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        info!("Writing dropped records to {}", path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            file: Some(file),
            recorded: 0,
        })
    }

    /// Record one drop.
    pub async fn record(&mut self, dropped: &DroppedRecord) -> Result<()> {
        warn!(
            entity = %dropped.entity,
            table = %dropped.table,
            original_id = dropped.original_id.as_deref().unwrap_or(""),
            new_id = dropped.new_id.as_deref().unwrap_or(""),
            "record dropped: {}",
            dropped.reason
        );

        if let Some(file) = self.file.as_mut() {
            let mut line = serde_json::to_vec(dropped)?;
            line.push(b'\n');
            file.write_all(&line).await?;
        }
        self.recorded += 1;
        Ok(())
    }

    /// Drops recorded so far.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flush the audit file.
    pub async fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}
