//! Destination scalar values and transformed records.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::entity::EntityType;

/// Scalar destined for one relational column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// 64-bit signed integer.
    Int(i64),

    /// Double precision float.
    Float(f64),

    /// Text value.
    Text(String),

    /// Timestamp without timezone (UTC).
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Borrow the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One relational row produced from one source document.
///
/// `values` is aligned with [`EntityDef::columns`](crate::entity::EntityDef::columns):
/// the new primary key first, then one value per field rule.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRecord {
    /// Entity type the record belongs to.
    pub entity: EntityType,

    /// Identifier of the source document, if it had one.
    pub original_id: Option<String>,

    /// Newly minted identifier (also `values[0]`).
    pub id: String,

    /// Column values in destination column order.
    pub values: Vec<SqlValue>,
}

impl TransformedRecord {
    /// Destination column names, aligned with `values`.
    pub fn columns(&self) -> Vec<&'static str> {
        self.entity.definition().columns()
    }

    /// Value of a destination column.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns()
            .iter()
            .position(|c| *c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Full payload as a JSON object, for audit output.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (column, value) in self.columns().into_iter().zip(&self.values) {
            map.insert(
                column.to_string(),
                serde_json::to_value(value).unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }
}

/// Ordered group of records committed as one unit.
pub type Batch = Vec<TransformedRecord>;
