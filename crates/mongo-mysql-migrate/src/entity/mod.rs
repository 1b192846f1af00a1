//! Entity types and the closed field-mapping table.
//!
//! Every entity type owns one [`EntityDef`] row describing its default source
//! collection, destination table, per-field transformation rules and the columns
//! that may be updated in place on a primary-key conflict. The transformer,
//! planner and writers are driven entirely by this table; adding an entity type
//! means adding a variant and a row, not new control flow.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MigrateError;

/// Source document field holding the original identifier.
pub const SOURCE_ID_FIELD: &str = "_id";

/// Destination column holding the newly minted identifier.
pub const PRIMARY_KEY_COLUMN: &str = "_id";

/// Width of a rendered UUID (the destination primary key / foreign key type).
pub const ID_LENGTH: u16 = 36;

/// Category of business object migrated as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Account,
    Company,
    Zone,
    Device,
    Sensor,
    SensorData,
}

impl EntityType {
    /// All entity types, in their natural dependency order.
    pub const ALL: [EntityType; 6] = [
        EntityType::Account,
        EntityType::Company,
        EntityType::Zone,
        EntityType::Device,
        EntityType::Sensor,
        EntityType::SensorData,
    ];

    /// Stable snake_case name, as used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Account => "account",
            EntityType::Company => "company",
            EntityType::Zone => "zone",
            EntityType::Device => "device",
            EntityType::Sensor => "sensor",
            EntityType::SensorData => "sensor_data",
        }
    }

    /// The mapping table row for this type.
    pub fn definition(&self) -> &'static EntityDef {
        match self {
            EntityType::Account => &ACCOUNT,
            EntityType::Company => &COMPANY,
            EntityType::Zone => &ZONE,
            EntityType::Device => &DEVICE,
            EntityType::Sensor => &SENSOR,
            EntityType::SensorData => &SENSOR_DATA,
        }
    }

    /// Entity types referenced by this type's foreign-key fields.
    pub fn referenced_types(&self) -> Vec<EntityType> {
        let mut refs: Vec<EntityType> = self
            .definition()
            .fields
            .iter()
            .filter_map(|f| match f.kind {
                FieldKind::Reference(target) => Some(target),
                _ => None,
            })
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| MigrateError::Config(format!("unknown entity type '{}'", s)))
    }
}

/// How a single source field becomes a destination column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// String column. `None` default means NULL.
    Text {
        default: Option<&'static str>,
        max_len: u16,
    },
    /// Integer column.
    Int { default: i64 },
    /// Floating point column.
    Float { default: f64 },
    /// Boolean column.
    Bool { default: bool },
    /// Timestamp column; absent or malformed values become NULL.
    Timestamp,
    /// Foreign key to another entity type, rewritten through the registry.
    Reference(EntityType),
}

/// Rule for one field of an entity type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRule {
    /// Field name in the source document.
    pub field: &'static str,
    /// Column name in the destination table.
    pub column: &'static str,
    /// Transformation rule.
    pub kind: FieldKind,
}

impl FieldRule {
    const fn new(field: &'static str, kind: FieldKind) -> Self {
        Self {
            field,
            column: field,
            kind,
        }
    }

    /// Whether the destination column gets an index (foreign keys do).
    pub fn is_indexed(&self) -> bool {
        matches!(self.kind, FieldKind::Reference(_))
    }
}

/// Multi-column secondary index on a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeIndex {
    /// Suffix of the index name, rendered as `idx_<table>_<name>`.
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

/// One row of the mapping table.
#[derive(Debug)]
pub struct EntityDef {
    pub entity: EntityType,
    /// Default source collection.
    pub collection: &'static str,
    /// Default destination table.
    pub table: &'static str,
    /// Field rules, in destination column order (after the primary key).
    pub fields: &'static [FieldRule],
    /// Columns overwritten when the primary key already exists.
    pub mutable_columns: &'static [&'static str],
    /// Secondary indexes beyond the per-reference ones.
    pub composite_indexes: &'static [CompositeIndex],
}

impl EntityDef {
    /// Destination columns in insert order, primary key first.
    pub fn columns(&self) -> Vec<&'static str> {
        std::iter::once(PRIMARY_KEY_COLUMN)
            .chain(self.fields.iter().map(|f| f.column))
            .collect()
    }
}

const fn text(default: &'static str) -> FieldKind {
    FieldKind::Text {
        default: Some(default),
        max_len: 255,
    }
}

const fn nullable_text() -> FieldKind {
    FieldKind::Text {
        default: None,
        max_len: 255,
    }
}

const INT0: FieldKind = FieldKind::Int { default: 0 };
const FLOAT0: FieldKind = FieldKind::Float { default: 0.0 };
const TS: FieldKind = FieldKind::Timestamp;

static ACCOUNT: EntityDef = EntityDef {
    entity: EntityType::Account,
    collection: "accounts",
    table: "accounts",
    fields: &[
        FieldRule::new("username", text("")),
        FieldRule::new("email", text("")),
        FieldRule::new("password", text("")),
        FieldRule::new("phone", nullable_text()),
        FieldRule::new("role", text("user")),
        FieldRule::new("isActive", FieldKind::Bool { default: true }),
        FieldRule::new("createdAt", TS),
        FieldRule::new("updatedAt", TS),
    ],
    mutable_columns: &["username", "email", "phone", "role", "isActive", "updatedAt"],
    composite_indexes: &[],
};

static COMPANY: EntityDef = EntityDef {
    entity: EntityType::Company,
    collection: "companies",
    table: "companies",
    fields: &[
        FieldRule::new("name", text("")),
        FieldRule::new("address", nullable_text()),
        FieldRule::new("phone", nullable_text()),
        FieldRule::new("email", nullable_text()),
        FieldRule::new("account", FieldKind::Reference(EntityType::Account)),
        FieldRule::new("createdAt", TS),
        FieldRule::new("updatedAt", TS),
    ],
    mutable_columns: &["name", "address", "phone", "email", "updatedAt"],
    composite_indexes: &[],
};

static ZONE: EntityDef = EntityDef {
    entity: EntityType::Zone,
    collection: "zones",
    table: "zones",
    fields: &[
        FieldRule::new("name", text("")),
        FieldRule::new("description", nullable_text()),
        FieldRule::new("latitude", FLOAT0),
        FieldRule::new("longitude", FLOAT0),
        FieldRule::new("company", FieldKind::Reference(EntityType::Company)),
        FieldRule::new("createdAt", TS),
        FieldRule::new("updatedAt", TS),
    ],
    mutable_columns: &["name", "description", "latitude", "longitude", "updatedAt"],
    composite_indexes: &[],
};

static DEVICE: EntityDef = EntityDef {
    entity: EntityType::Device,
    collection: "devices",
    table: "devices",
    fields: &[
        FieldRule::new("name", text("")),
        FieldRule::new("serialNumber", nullable_text()),
        FieldRule::new("status", text("inactive")),
        FieldRule::new("isOnline", FieldKind::Bool { default: false }),
        FieldRule::new("zone", FieldKind::Reference(EntityType::Zone)),
        FieldRule::new("company", FieldKind::Reference(EntityType::Company)),
        FieldRule::new("createdAt", TS),
        FieldRule::new("updatedAt", TS),
    ],
    mutable_columns: &["name", "status", "isOnline", "updatedAt"],
    composite_indexes: &[],
};

static SENSOR: EntityDef = EntityDef {
    entity: EntityType::Sensor,
    collection: "sensors",
    table: "sensors",
    fields: &[
        FieldRule::new("name", text("")),
        FieldRule::new("type", text("")),
        FieldRule::new("unit", nullable_text()),
        FieldRule::new("minThreshold", FLOAT0),
        FieldRule::new("maxThreshold", FLOAT0),
        FieldRule::new("isActive", FieldKind::Bool { default: true }),
        FieldRule::new("device", FieldKind::Reference(EntityType::Device)),
        FieldRule::new("zone", FieldKind::Reference(EntityType::Zone)),
        FieldRule::new("createdAt", TS),
        FieldRule::new("updatedAt", TS),
    ],
    mutable_columns: &[
        "name",
        "unit",
        "minThreshold",
        "maxThreshold",
        "isActive",
        "updatedAt",
    ],
    composite_indexes: &[],
};

static SENSOR_DATA: EntityDef = EntityDef {
    entity: EntityType::SensorData,
    collection: "sensordatas",
    table: "sensorsdata",
    fields: &[
        FieldRule::new("sensor", FieldKind::Reference(EntityType::Sensor)),
        FieldRule::new("zone", FieldKind::Reference(EntityType::Zone)),
        FieldRule::new("value", INT0),
        FieldRule::new("timeReceived", TS),
        FieldRule::new("minute", INT0),
        FieldRule::new("hour", INT0),
        FieldRule::new("day", INT0),
        FieldRule::new("month", INT0),
        FieldRule::new("year", INT0),
        FieldRule::new("createdAt", TS),
        FieldRule::new("updatedAt", TS),
    ],
    mutable_columns: &["sensor", "zone", "value"],
    composite_indexes: &[CompositeIndex {
        name: "time",
        columns: &["year", "month", "day", "hour", "minute"],
    }],
};
