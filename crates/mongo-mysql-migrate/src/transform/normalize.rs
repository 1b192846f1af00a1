//! Normalization of MongoDB Extended JSON values.
//!
//! Every function here is total: anything it cannot interpret becomes `None`
//! and the caller applies the field's default.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::ops::RangeInclusive;

/// Years a MySQL `DATETIME` column can hold.
const DATETIME_YEARS: RangeInclusive<i32> = 1000..=9999;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

/// Extract an identifier from a bare string, `{"$oid": ..}`, a number, or an
/// embedded document carrying its own `_id`.
pub fn normalize_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => {
            if let Some(oid) = map.get("$oid").and_then(Value::as_str) {
                return normalize_id(&Value::String(oid.to_string()));
            }
            if let Some(n) = wrapped_number(value) {
                return Some(n);
            }
            map.get("_id").and_then(normalize_id)
        }
        _ => None,
    }
}

/// Interpret `{"$date": ..}`, date strings, or epoch milliseconds as UTC.
///
/// Instants outside the `DATETIME` year range are `None`.
pub fn normalize_timestamp(value: &Value) -> Option<NaiveDateTime> {
    parse_timestamp(value).filter(|dt| DATETIME_YEARS.contains(&dt.year()))
}

fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Object(map) => match map.get("$date") {
            Some(inner) => parse_timestamp(inner),
            None => wrapped_number(value)
                .and_then(|n| n.parse::<i64>().ok())
                .and_then(from_millis),
        },
        Value::String(s) => parse_datetime(s.trim()),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(from_millis),
        _ => None,
    }
}

/// Interpret a value as an integer. Fractional numbers are truncated.
pub fn normalize_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| float_to_int(n.as_f64()?)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_int))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Object(_) => wrapped_number(value).and_then(|s| normalize_int(&Value::String(s))),
        _ => None,
    }
}

/// Interpret a value as a float.
pub fn normalize_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Object(_) => wrapped_number(value).and_then(|s| normalize_float(&Value::String(s))),
        _ => None,
    }
}

/// Interpret a value as a boolean: booleans, 0/1, and common spellings.
pub fn normalize_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Interpret a value as text. Scalars are rendered, object ids unwrapped.
pub fn normalize_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) if map.contains_key("$oid") => normalize_id(value),
        Value::Object(_) => wrapped_number(value),
        _ => None,
    }
}

/// Unwrap `$numberInt`, `$numberLong` and `$numberDouble` into their string form.
fn wrapped_number(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    ["$numberInt", "$numberLong", "$numberDouble"]
        .iter()
        .find_map(|key| map.get(*key))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn from_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

fn float_to_int(f: f64) -> Option<i64> {
    (f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64).then(|| f.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_normalize_id_forms() {
        assert_eq!(
            normalize_id(&json!({"$oid": "65f1c0ffee0000000000abcd"})),
            Some("65f1c0ffee0000000000abcd".to_string())
        );
        assert_eq!(normalize_id(&json!("  abc ")), Some("abc".to_string()));
        assert_eq!(normalize_id(&json!(42)), Some("42".to_string()));
        assert_eq!(
            normalize_id(&json!({"$numberLong": "9007199254740993"})),
            Some("9007199254740993".to_string())
        );
        assert_eq!(
            normalize_id(&json!({"_id": {"$oid": "aa"}, "name": "embedded"})),
            Some("aa".to_string())
        );
        assert_eq!(normalize_id(&json!("")), None);
        assert_eq!(normalize_id(&json!(null)), None);
        assert_eq!(normalize_id(&json!([1, 2])), None);
    }

    #[test]
    fn test_normalize_timestamp_forms() {
        let expected = ts(2024, 5, 17, 10, 15, 30);
        assert_eq!(
            normalize_timestamp(&json!({"$date": "2024-05-17T10:15:30Z"})),
            Some(expected)
        );
        assert_eq!(
            normalize_timestamp(&json!({"$date": "2024-05-17T12:15:30+02:00"})),
            Some(expected)
        );
        assert_eq!(
            normalize_timestamp(&json!({"$date": {"$numberLong": "1715940930000"}})),
            Some(expected)
        );
        assert_eq!(normalize_timestamp(&json!(1715940930000i64)), Some(expected));
        assert_eq!(
            normalize_timestamp(&json!("2024-05-17 10:15:30")),
            Some(expected)
        );
        assert_eq!(
            normalize_timestamp(&json!("2024-05-17")),
            Some(ts(2024, 5, 17, 0, 0, 0))
        );
    }

    #[test]
    fn test_malformed_timestamp_is_none() {
        assert_eq!(normalize_timestamp(&json!("not a date")), None);
        assert_eq!(normalize_timestamp(&json!({"$date": true})), None);
        assert_eq!(normalize_timestamp(&json!(true)), None);
        assert_eq!(normalize_timestamp(&json!("")), None);
    }

    #[test]
    fn test_timestamp_outside_datetime_range_is_none() {
        assert_eq!(normalize_timestamp(&json!(1_000_000_000_000_000i64)), None);
        assert_eq!(
            normalize_timestamp(&json!({"$date": "0500-01-01T00:00:00Z"})),
            None
        );
        assert_eq!(normalize_timestamp(&json!("0999-12-31")), None);
        assert_eq!(
            normalize_timestamp(&json!({"$date": "1000-01-01T00:00:00Z"})),
            Some(ts(1000, 1, 1, 0, 0, 0))
        );
        assert_eq!(
            normalize_timestamp(&json!("9999-12-31 23:59:59")),
            Some(ts(9999, 12, 31, 23, 59, 59))
        );
    }

    #[test]
    fn test_normalize_int() {
        assert_eq!(normalize_int(&json!(0)), Some(0));
        assert_eq!(normalize_int(&json!(-7)), Some(-7));
        assert_eq!(normalize_int(&json!(21.9)), Some(21));
        assert_eq!(normalize_int(&json!(" 12 ")), Some(12));
        assert_eq!(normalize_int(&json!("3.5")), Some(3));
        assert_eq!(normalize_int(&json!({"$numberLong": "123"})), Some(123));
        assert_eq!(normalize_int(&json!(false)), Some(0));
        assert_eq!(normalize_int(&json!("abc")), None);
        assert_eq!(normalize_int(&json!([])), None);
    }

    #[test]
    fn test_normalize_float_and_bool() {
        assert_eq!(normalize_float(&json!(0.0)), Some(0.0));
        assert_eq!(normalize_float(&json!("2.5")), Some(2.5));
        assert_eq!(normalize_float(&json!({"$numberDouble": "1.25"})), Some(1.25));
        assert_eq!(normalize_float(&json!("NaN")), None);

        assert_eq!(normalize_bool(&json!(false)), Some(false));
        assert_eq!(normalize_bool(&json!(0)), Some(false));
        assert_eq!(normalize_bool(&json!(1)), Some(true));
        assert_eq!(normalize_bool(&json!("Yes")), Some(true));
        assert_eq!(normalize_bool(&json!(5)), None);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text(&json!("")), Some(String::new()));
        assert_eq!(normalize_text(&json!(15)), Some("15".to_string()));
        assert_eq!(normalize_text(&json!({"$oid": "ab"})), Some("ab".to_string()));
        assert_eq!(normalize_text(&json!({"nested": 1})), None);
    }
}
