//! Migration plan: the validated dependency order of entity types.
//!
//! The configured entity list is treated as a directed graph whose edges are the
//! foreign-key references of each type plus any explicit `depends_on` entries.
//! The plan is a topological order of that graph, stable with respect to the
//! declared order, so every foreign key can be resolved against entities that were
//! migrated earlier in the same run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

use crate::config::MigrationConfig;
use crate::entity::EntityType;
use crate::error::{MigrateError, Result};

/// One unit of work: migrate one entity type from one collection into one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationJob {
    /// Entity type.
    pub entity: EntityType,
    /// Source collection name.
    pub collection: String,
    /// Destination table name.
    pub table: String,
    /// Position in the dependency order (0-based).
    pub ordinal: usize,
}

/// Ordered, validated list of migration jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    jobs: Vec<MigrationJob>,
}

struct Node {
    entity: EntityType,
    collection: String,
    table: String,
    deps: BTreeSet<EntityType>,
}

impl MigrationPlan {
    /// Build and validate the plan from configuration.
    ///
    /// Rejects duplicate entity types or tables, dependencies on types that are
    /// not part of the run, and dependency cycles.
    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        let declared = config.declared_entities();
        if declared.is_empty() {
            return Err(MigrateError::Config("no entity types to migrate".into()));
        }

        let mut seen_types = HashSet::new();
        let mut seen_tables = HashSet::new();
        let mut nodes = Vec::with_capacity(declared.len());

        for entry in &declared {
            if !seen_types.insert(entry.entity) {
                return Err(MigrateError::Config(format!(
                    "entity type '{}' is declared more than once",
                    entry.entity
                )));
            }
            let table = entry.table();
            if !seen_tables.insert(table.clone()) {
                return Err(MigrateError::Config(format!(
                    "table '{}' is targeted by more than one entity type",
                    table
                )));
            }

            let mut deps: BTreeSet<EntityType> =
                entry.entity.referenced_types().into_iter().collect();
            deps.extend(entry.depends_on.iter().copied());

            nodes.push(Node {
                entity: entry.entity,
                collection: entry.collection(),
                table,
                deps,
            });
        }

        for node in &nodes {
            if let Some(missing) = node.deps.iter().find(|d| !seen_types.contains(*d)) {
                return Err(MigrateError::Config(format!(
                    "entity type '{}' depends on '{}', which is not part of the migration",
                    node.entity, missing
                )));
            }
        }

        let order = stable_topological_order(&nodes)?;

        let declared_order: Vec<EntityType> = nodes.iter().map(|n| n.entity).collect();
        let sorted_order: Vec<EntityType> = order.iter().map(|&i| nodes[i].entity).collect();
        if declared_order != sorted_order {
            warn!(
                "Declared entity order {:?} violates dependencies, migrating as {:?}",
                declared_order, sorted_order
            );
        }

        let jobs = order
            .into_iter()
            .enumerate()
            .map(|(ordinal, i)| MigrationJob {
                entity: nodes[i].entity,
                collection: nodes[i].collection.clone(),
                table: nodes[i].table.clone(),
                ordinal,
            })
            .collect::<Vec<_>>();

        debug!("Migration plan: {:?}", sorted_order);
        Ok(Self { jobs })
    }

    /// Jobs in execution order.
    pub fn jobs(&self) -> &[MigrationJob] {
        &self.jobs
    }

    /// Look up the job for an entity type.
    pub fn job(&self, entity: EntityType) -> Option<&MigrationJob> {
        self.jobs.iter().find(|j| j.entity == entity)
    }
}

/// Kahn's algorithm, always emitting the earliest-declared ready node.
fn stable_topological_order(nodes: &[Node]) -> Result<Vec<usize>> {
    let mut placed: HashSet<EntityType> = HashSet::with_capacity(nodes.len());
    let mut order = Vec::with_capacity(nodes.len());

    while order.len() < nodes.len() {
        let next = nodes.iter().enumerate().find(|(_, n)| {
            !placed.contains(&n.entity) && n.deps.iter().all(|d| placed.contains(d))
        });

        match next {
            Some((i, node)) => {
                placed.insert(node.entity);
                order.push(i);
            }
            None => {
                let stuck: Vec<String> = nodes
                    .iter()
                    .filter(|n| !placed.contains(&n.entity))
                    .map(|n| n.entity.to_string())
                    .collect();
                return Err(MigrateError::Config(format!(
                    "dependency cycle between entity types: {}",
                    stuck.join(", ")
                )));
            }
        }
    }

    Ok(order)
}
