//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};
use crate::plan::MigrationPlan;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    match config.source.r#type.as_str() {
        "mongodb" => {
            if config.source.uri.is_empty() {
                return Err(MigrateError::Config("source.uri is required".into()));
            }
            if config.source.database.is_empty() {
                return Err(MigrateError::Config("source.database is required".into()));
            }
        }
        "json_dir" => {
            if config.source.path.is_none() {
                return Err(MigrateError::Config(
                    "source.path is required for json_dir sources".into(),
                ));
            }
        }
        other => {
            return Err(MigrateError::Config(format!(
                "source.type must be 'mongodb' or 'json_dir', got '{}'",
                other
            )));
        }
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.r#type != "mysql" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'mysql', got '{}'",
            config.target.r#type
        )));
    }
    if let Some(0) = config.target.max_connections {
        return Err(MigrateError::Config(
            "target.max_connections must be at least 1".into(),
        ));
    }

    // Migration config validation - only check if explicitly set
    if let Some(0) = config.migration.batch_size {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }

    // Dependency graph: duplicates, missing dependencies, cycles
    MigrationPlan::from_config(&config.migration)?;

    Ok(())
}
