//! Error types for the migration library.

use thiserror::Error;

use crate::entity::EntityType;

/// Exit code for configuration errors (invalid YAML, bad plan, etc.).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for source/target connection or transport failures.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for a violated identifier-registry invariant.
pub const EXIT_INVARIANT_ERROR: u8 = 3;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 4;
/// Exit code for a run that completed with dropped records.
pub const EXIT_PARTIAL: u8 = 5;
/// Exit code for file I/O errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad dependency plan, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source store (MongoDB) connection or query error
    #[error("Source store error: {0}")]
    Source(#[from] mongodb::error::Error),

    /// Destination (MySQL) connection or transport error
    #[error("Target database error: {0}")]
    Target(#[from] mysql_async::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// The same original identifier was registered twice with different new identifiers.
    #[error(
        "Duplicate identifier mapping for {entity} '{original_id}': \
         already mapped to {existing}, refused {attempted}"
    )]
    DuplicateMapping {
        entity: EntityType,
        original_id: String,
        existing: String,
        attempted: String,
    },

    /// A foreign key points at a document that was never migrated.
    #[error(
        "Unresolved reference in {entity}.{field}: {target} '{original_id}' has no migrated identifier"
    )]
    UnresolvedReference {
        entity: EntityType,
        field: String,
        target: EntityType,
        original_id: String,
    },

    /// The destination refused a batch (constraint violation, bad value, ...).
    ///
    /// Recoverable: the batch writer isolates the offending record by bisection.
    #[error("Batch rejected by table {table}: {message}")]
    Rejected { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Rejected error
    pub fn rejected(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Rejected {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether this error concerns a single record or batch rather than the run.
    ///
    /// Record-level errors are isolated and reported as drops; everything else
    /// aborts the run.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            MigrateError::Rejected { .. } | MigrateError::UnresolvedReference { .. }
        )
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Source(_)
            | MigrateError::Target(_)
            | MigrateError::Pool { .. }
            | MigrateError::Rejected { .. }
            | MigrateError::UnresolvedReference { .. } => EXIT_CONNECTION_ERROR,
            MigrateError::DuplicateMapping { .. } => EXIT_INVARIANT_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
