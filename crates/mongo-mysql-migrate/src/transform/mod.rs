//! Record transformer: one raw document to one relational record.
//!
//! Field handling is driven by the entity's mapping table. Defaults apply only
//! when a field is absent or `null`; present zero, `false` and empty values are
//! kept. Foreign keys are rewritten through the [`IdentifierRegistry`].

pub mod normalize;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::entity::{EntityType, FieldKind, FieldRule, SOURCE_ID_FIELD};
use crate::error::{MigrateError, Result};
use crate::registry::{IdMinter, IdentifierRegistry};
use crate::source::RawDocument;
use crate::value::{SqlValue, TransformedRecord};

use normalize::{
    normalize_bool, normalize_float, normalize_id, normalize_int, normalize_text,
    normalize_timestamp,
};

/// Policy for a foreign key whose referenced document has no registered id.
///
/// Applied uniformly to every entity type in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Fail the record with [`MigrateError::UnresolvedReference`]; it is dropped and audited.
    #[default]
    Reject,
    /// Substitute a freshly minted identifier and log a warning.
    Placeholder,
}

/// Result of transforming one document.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub record: TransformedRecord,
    /// Foreign keys that were replaced by placeholder identifiers.
    pub placeholders: usize,
}

/// Converts raw documents into relational records.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer {
    minter: IdMinter,
    policy: UnresolvedPolicy,
}

impl Transformer {
    pub fn new(minter: IdMinter, policy: UnresolvedPolicy) -> Self {
        Self { minter, policy }
    }

    pub fn policy(&self) -> UnresolvedPolicy {
        self.policy
    }

    /// Transform one document of `entity`.
    ///
    /// On success the new identifier is registered under the document's original
    /// id. A rejected record registers nothing.
    pub fn transform(
        &self,
        raw: &RawDocument,
        entity: EntityType,
        registry: &mut IdentifierRegistry,
    ) -> Result<Transformed> {
        let def = entity.definition();
        let original_id = raw.get(SOURCE_ID_FIELD).and_then(normalize_id);
        let new_id = self.minter.mint(entity, original_id.as_deref());

        let mut values = Vec::with_capacity(def.fields.len() + 1);
        values.push(SqlValue::Text(new_id.clone()));

        let mut placeholders = 0;
        for rule in def.fields {
            let present = raw.get(rule.field).filter(|v| !v.is_null());
            let value = match rule.kind {
                FieldKind::Reference(target) => match present.filter(|v| !is_blank(v)) {
                    None => SqlValue::Null,
                    Some(reference) => {
                        let (value, is_placeholder) =
                            self.resolve(entity, rule, target, reference, registry)?;
                        if is_placeholder {
                            placeholders += 1;
                        }
                        value
                    }
                },
                kind => convert_scalar(kind, present),
            };
            values.push(value);
        }

        if let Some(original) = original_id.as_deref() {
            registry.put(entity, original, &new_id)?;
        }

        Ok(Transformed {
            record: TransformedRecord {
                entity,
                original_id,
                id: new_id,
                values,
            },
            placeholders,
        })
    }

    fn resolve(
        &self,
        entity: EntityType,
        rule: &FieldRule,
        target: EntityType,
        reference: &Value,
        registry: &IdentifierRegistry,
    ) -> Result<(SqlValue, bool)> {
        let key = normalize_id(reference).unwrap_or_else(|| reference.to_string());

        if let Some(new_id) = registry.get(target, &key) {
            return Ok((SqlValue::Text(new_id.to_string()), false));
        }

        match self.policy {
            UnresolvedPolicy::Reject => Err(MigrateError::UnresolvedReference {
                entity,
                field: rule.field.to_string(),
                target,
                original_id: key,
            }),
            UnresolvedPolicy::Placeholder => {
                let placeholder = IdMinter::fresh();
                warn!(
                    "{}.{}: {} '{}' not migrated, using placeholder {}",
                    entity, rule.field, target, key, placeholder
                );
                Ok((SqlValue::Text(placeholder), true))
            }
        }
    }
}

/// An empty or whitespace-only string, which carries no reference.
fn is_blank(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.trim().is_empty())
}

/// Apply a scalar rule to a present-or-absent field value.
fn convert_scalar(kind: FieldKind, present: Option<&Value>) -> SqlValue {
    match kind {
        FieldKind::Text { default, .. } => present
            .and_then(normalize_text)
            .map(SqlValue::Text)
            .unwrap_or_else(|| SqlValue::from(default)),
        FieldKind::Int { default } => {
            SqlValue::Int(present.and_then(normalize_int).unwrap_or(default))
        }
        FieldKind::Float { default } => {
            SqlValue::Float(present.and_then(normalize_float).unwrap_or(default))
        }
        FieldKind::Bool { default } => {
            SqlValue::Bool(present.and_then(normalize_bool).unwrap_or(default))
        }
        FieldKind::Timestamp => SqlValue::from(present.and_then(normalize_timestamp)),
        FieldKind::Reference(_) => SqlValue::Null,
    }
}
