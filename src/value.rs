//! Wire values: what a document field can hold on the remote store.
//!
//! A document is a flat [`WireMap`] of field name to [`Value`]; nested maps and
//! arrays carry structured data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::UnixTime;

/// Ordered field name → value map accepted by the document store.
pub type WireMap = BTreeMap<String, Value>;

/// Possible values a document field can hold.
///
/// # Examples
///
/// ```
/// use docbatch::Value;
///
/// let name = Value::from("Nova");
/// let level = Value::from(12);
///
/// assert!(name.is_string());
/// assert_eq!(level.as_int(), Some(12));
/// assert_eq!(level.type_name(), "int");
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    /// Local timestamp wrapper that leaked into a payload unconverted.
    UnixTime(UnixTime),
    Array(Vec<Value>),
    Map(WireMap),
    Null,
}

#[allow(missing_docs)]
impl Value {
    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub const fn is_map(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_map(&self) -> Option<&WireMap> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::UnixTime(_) => "unix_time",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Null => "null",
        }
    }

    /// Drops nulls and empty nested maps, recursively.
    ///
    /// Returns `None` when nothing is left: a null, or a map whose every entry
    /// was dropped.
    #[must_use]
    pub fn compact(self) -> Option<Self> {
        match self {
            Self::Null => None,
            Self::Map(map) => compact_map(map).map(Self::Map),
            other => Some(other),
        }
    }
}

/// Compacts every entry of `map`; `None` when the result would be empty.
#[must_use]
pub fn compact_map(map: WireMap) -> Option<WireMap> {
    let compacted: WireMap = map
        .into_iter()
        .filter_map(|(k, v)| v.compact().map(|v| (k, v)))
        .collect();
    if compacted.is_empty() {
        None
    } else {
        Some(compacted)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::UnixTime(v) => write!(f, "unix:{v}"),
            Self::Array(v) => write!(f, "array[{}]", v.len()),
            Self::Map(v) => write!(f, "map[{}]", v.len()),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<UnixTime> for Value {
    fn from(v: UnixTime) -> Self {
        Self::UnixTime(v)
    }
}

impl From<WireMap> for Value {
    fn from(v: WireMap) -> Self {
        Self::Map(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(fields) => {
                Self::Map(fields.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_int_reads_as_float() {
        let val = Value::Int(42);
        assert!(val.is_int());
        assert_eq!(val.as_int(), Some(42));
        assert_eq!(val.as_float(), Some(42.0));
        assert_eq!(val.type_name(), "int");
    }

    #[test]
    fn test_value_type_mismatch() {
        let val = Value::Bool(true);
        assert!(val.as_int().is_none());
        assert!(val.as_string().is_none());
        assert!(val.as_map().is_none());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Bool(true)), "true");
        assert_eq!(format!("{}", Value::String("hi".into())), "\"hi\"");
        assert_eq!(format!("{}", Value::UnixTime(UnixTime::from_secs(5))), "unix:5");
        assert_eq!(format!("{}", Value::Null), "null");
    }

    #[test]
    fn test_compact_drops_nulls_and_empty_maps() {
        let mut inner = WireMap::new();
        inner.insert("gone".to_string(), Value::Null);

        let mut map = WireMap::new();
        map.insert("name".to_string(), Value::from("Nova"));
        map.insert("nothing".to_string(), Value::Null);
        map.insert("empty".to_string(), Value::Map(inner));

        let compacted = compact_map(map).unwrap();
        assert_eq!(compacted.len(), 1);
        assert_eq!(compacted.get("name"), Some(&Value::from("Nova")));
    }

    #[test]
    fn test_compact_all_empty_is_none() {
        let mut map = WireMap::new();
        map.insert("a".to_string(), Value::Null);
        assert!(compact_map(map).is_none());
        assert!(Value::Null.compact().is_none());
    }

    #[test]
    fn test_value_from_json() {
        let json = serde_json::json!({"name": "Nova", "level": 3, "tags": ["a"], "ratio": 0.5});
        let Value::Map(map) = Value::from(json) else {
            panic!("expected map");
        };
        assert_eq!(map.get("level"), Some(&Value::Int(3)));
        assert_eq!(map.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(map.get("tags"), Some(&Value::Array(vec![Value::from("a")])));
    }

    #[test]
    fn test_value_serialization() {
        let val = Value::String("test".into());
        let json = serde_json::to_string(&val).unwrap();
        let deserialized: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(val, deserialized);
    }
}
