//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::entity::EntityType;
use crate::registry::IdStrategy;
use crate::transform::UnresolvedPolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source document store configuration.
    pub source: SourceConfig,

    /// Destination database configuration (MySQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source document store configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Store type: "mongodb" or "json_dir".
    #[serde(default = "default_mongodb")]
    pub r#type: String,

    /// MongoDB connection URI.
    #[serde(default = "default_mongo_uri")]
    pub uri: String,

    /// MongoDB database name.
    #[serde(default)]
    pub database: String,

    /// Directory of `<collection>.json` exports (json_dir only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl SourceConfig {
    /// The URI with any `user:password@` credentials masked.
    pub fn redacted_uri(&self) -> String {
        match (self.uri.find("://"), self.uri.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}[REDACTED]{}", &self.uri[..scheme_end + 3], &self.uri[at..])
            }
            _ => self.uri.clone(),
        }
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("type", &self.r#type)
            .field("uri", &self.redacted_uri())
            .field("database", &self.database)
            .field("path", &self.path)
            .finish()
    }
}

/// Destination database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (always "mysql" for now).
    #[serde(default = "default_mysql")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode: disable, prefer, require, verify_ca, verify_identity (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl TargetConfig {
    pub fn get_max_connections(&self) -> usize {
        self.max_connections.unwrap_or(4)
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Documents per write batch, also the reader's read-ahead (default: 1000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// What to do with a foreign key whose target was never migrated.
    #[serde(default)]
    pub unresolved_references: UnresolvedPolicy,

    /// How new identifiers are minted.
    #[serde(default)]
    pub id_strategy: IdStrategy,

    /// Run the destination DDL before migrating (default: true).
    #[serde(default = "default_true")]
    pub ensure_schema: bool,

    /// Append dropped records as JSON lines to this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_log: Option<PathBuf>,

    /// Entity types to migrate. Empty means every known type with defaults.
    #[serde(default)]
    pub entities: Vec<EntityJobConfig>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            unresolved_references: UnresolvedPolicy::default(),
            id_strategy: IdStrategy::default(),
            ensure_schema: true,
            drop_log: None,
            entities: Vec::new(),
        }
    }
}

impl MigrationConfig {
    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(1_000)
    }

    /// Declared entity jobs, falling back to every type in natural order.
    pub fn declared_entities(&self) -> Vec<EntityJobConfig> {
        if self.entities.is_empty() {
            EntityType::ALL
                .iter()
                .map(|e| EntityJobConfig::new(*e))
                .collect()
        } else {
            self.entities.clone()
        }
    }
}

/// One configured entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityJobConfig {
    /// Entity type.
    pub entity: EntityType,

    /// Source collection override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    /// Destination table override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    /// Extra ordering dependencies beyond the type's foreign keys.
    #[serde(default)]
    pub depends_on: Vec<EntityType>,
}

impl EntityJobConfig {
    pub fn new(entity: EntityType) -> Self {
        Self {
            entity,
            collection: None,
            table: None,
            depends_on: Vec::new(),
        }
    }

    pub fn collection(&self) -> String {
        self.collection
            .clone()
            .unwrap_or_else(|| self.entity.definition().collection.to_string())
    }

    pub fn table(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| self.entity.definition().table.to_string())
    }
}

// Default value functions for serde
fn default_mongodb() -> String {
    "mongodb".to_string()
}

fn default_mongo_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_mysql() -> String {
    "mysql".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_true() -> bool {
    true
}
