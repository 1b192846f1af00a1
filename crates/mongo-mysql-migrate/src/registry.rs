//! Identifier registry: original document ids to newly minted row ids.
//!
//! The registry lives for one run and is owned by the orchestrator. Entries are
//! write-once: re-registering the same mapping is a no-op, registering a different
//! id for an existing key is an invariant violation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::entity::EntityType;
use crate::error::{MigrateError, Result};

/// Namespace for identifiers derived from original ids.
const DERIVED_NAMESPACE: Uuid = Uuid::from_u128(0x6d2f_91c4_5b1e_4c0a_9f7e_3a8d_2b64_e015);

/// How new identifiers are minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Fresh UUIDv7 per document per run.
    #[default]
    TimeOrdered,
    /// UUIDv5 of `<entity>:<original id>`, stable across runs.
    Derived,
}

/// Mints new row identifiers according to an [`IdStrategy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IdMinter {
    strategy: IdStrategy,
}

impl IdMinter {
    pub fn new(strategy: IdStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> IdStrategy {
        self.strategy
    }

    /// Mint the identifier for a document.
    ///
    /// Documents without an original id always get a fresh time-ordered id.
    pub fn mint(&self, entity: EntityType, original_id: Option<&str>) -> String {
        match (self.strategy, original_id) {
            (IdStrategy::Derived, Some(original)) => {
                let name = format!("{}:{}", entity, original);
                Uuid::new_v5(&DERIVED_NAMESPACE, name.as_bytes()).to_string()
            }
            _ => Self::fresh(),
        }
    }

    /// A fresh time-ordered identifier.
    pub fn fresh() -> String {
        Uuid::now_v7().to_string()
    }
}

/// Run-scoped mapping from `(entity type, original id)` to new id.
#[derive(Debug, Default)]
pub struct IdentifierRegistry {
    entries: HashMap<(EntityType, String), String>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a mapping.
    ///
    /// Idempotent for an identical mapping; fails with
    /// [`MigrateError::DuplicateMapping`] if the key already maps elsewhere.
    pub fn put(&mut self, entity: EntityType, original_id: &str, new_id: &str) -> Result<()> {
        match self.entries.get(&(entity, original_id.to_string())) {
            Some(existing) if existing == new_id => Ok(()),
            Some(existing) => Err(MigrateError::DuplicateMapping {
                entity,
                original_id: original_id.to_string(),
                existing: existing.clone(),
                attempted: new_id.to_string(),
            }),
            None => {
                self.entries
                    .insert((entity, original_id.to_string()), new_id.to_string());
                Ok(())
            }
        }
    }

    /// Look up the new id for an original id.
    pub fn get(&self, entity: EntityType, original_id: &str) -> Option<&str> {
        self.entries
            .get(&(entity, original_id.to_string()))
            .map(String::as_str)
    }

    /// Number of mappings registered for one entity type.
    pub fn count_for(&self, entity: EntityType) -> usize {
        self.entries.keys().filter(|(e, _)| *e == entity).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
