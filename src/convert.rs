//! Value conversion between local Rust types and wire values.
//!
//! [`WireConvert`] is the per-type converter the metadata cache and the keyed
//! collection use. `to_wire` returning `None` means "absent": the field is left
//! out of a sparse write. `from_wire` returning `None` means the wire value could
//! not become the local type and the local field must be left untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{ConfigurationError, DocResult};
use crate::time::UnixTime;
use crate::value::{Value, WireMap};

/// A value's document form: its identity-derived name and its field map.
#[derive(Debug, Clone)]
pub struct DocumentForm {
    /// Name the value reports for itself (the child document id).
    pub name: Option<String>,
    /// Field map of the value, or why it could not be produced.
    pub data: DocResult<WireMap>,
}

/// Converts a local type to and from its wire representation.
pub trait WireConvert: Sized {
    /// Wire form of this value; `None` when the value is absent.
    fn to_wire(&self) -> Option<Value>;

    /// Local value from a wire value; `None` when it does not convert.
    ///
    /// `field` is the wire field name, for diagnostics.
    fn from_wire(field: &str, value: &Value) -> Option<Self>;

    /// True if the local type can represent an explicit null.
    fn nullable() -> bool {
        false
    }

    /// Name used in diagnostics.
    fn type_label() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Builds a value from a child document of a collection.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::NotADocument` unless the type supports the
    /// document-absorption contract.
    fn from_document(key: &str, data: &WireMap) -> DocResult<Self> {
        let _ = (key, data);
        Err(ConfigurationError::NotADocument {
            type_name: Self::type_label(),
        }
        .into())
    }

    /// Document form of this value, if it is a document-shaped type.
    fn to_document(&self) -> Option<DocumentForm> {
        None
    }
}

impl WireConvert for bool {
    fn to_wire(&self) -> Option<Value> {
        Some(Value::Bool(*self))
    }

    fn from_wire(_field: &str, value: &Value) -> Option<Self> {
        value.as_bool()
    }

    fn type_label() -> &'static str {
        "bool"
    }
}

impl WireConvert for i64 {
    fn to_wire(&self) -> Option<Value> {
        Some(Value::Int(*self))
    }

    fn from_wire(_field: &str, value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(*v),
            Value::UnixTime(t) => Some(t.as_secs()),
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    fn type_label() -> &'static str {
        "i64"
    }
}

impl WireConvert for i32 {
    fn to_wire(&self) -> Option<Value> {
        Some(Value::Int(i64::from(*self)))
    }

    fn from_wire(field: &str, value: &Value) -> Option<Self> {
        i64::from_wire(field, value).and_then(|v| i32::try_from(v).ok())
    }

    fn type_label() -> &'static str {
        "i32"
    }
}

impl WireConvert for u32 {
    fn to_wire(&self) -> Option<Value> {
        Some(Value::Int(i64::from(*self)))
    }

    fn from_wire(field: &str, value: &Value) -> Option<Self> {
        i64::from_wire(field, value).and_then(|v| u32::try_from(v).ok())
    }

    fn type_label() -> &'static str {
        "u32"
    }
}

impl WireConvert for f64 {
    fn to_wire(&self) -> Option<Value> {
        Some(Value::Float(*self))
    }

    fn from_wire(_field: &str, value: &Value) -> Option<Self> {
        value.as_float()
    }

    fn type_label() -> &'static str {
        "f64"
    }
}

impl WireConvert for f32 {
    fn to_wire(&self) -> Option<Value> {
        Some(Value::Float(f64::from(*self)))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_wire(_field: &str, value: &Value) -> Option<Self> {
        value.as_float().map(|v| v as f32)
    }

    fn type_label() -> &'static str {
        "f32"
    }
}

impl WireConvert for String {
    fn to_wire(&self) -> Option<Value> {
        Some(Value::String(self.clone()))
    }

    fn from_wire(_field: &str, value: &Value) -> Option<Self> {
        value.as_string().map(str::to_string)
    }

    fn type_label() -> &'static str {
        "string"
    }
}

impl WireConvert for DateTime<Utc> {
    fn to_wire(&self) -> Option<Value> {
        Some(Value::Timestamp(*self))
    }

    fn from_wire(_field: &str, value: &Value) -> Option<Self> {
        match value {
            Value::Timestamp(t) => Some(*t),
            Value::UnixTime(t) => t.to_datetime(),
            Value::Int(secs) => UnixTime::from_secs(*secs).to_datetime(),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }

    fn type_label() -> &'static str {
        "timestamp"
    }
}

impl WireConvert for UnixTime {
    fn to_wire(&self) -> Option<Value> {
        Some(Value::Int(self.as_secs()))
    }

    fn from_wire(_field: &str, value: &Value) -> Option<Self> {
        match value {
            Value::Int(secs) => Some(Self::from_secs(*secs)),
            Value::UnixTime(t) => Some(*t),
            Value::Timestamp(t) => Some(Self::from(*t)),
            _ => None,
        }
    }

    fn type_label() -> &'static str {
        "unix_time"
    }
}

impl WireConvert for Value {
    fn to_wire(&self) -> Option<Value> {
        if self.is_null() {
            None
        } else {
            Some(self.clone())
        }
    }

    fn from_wire(_field: &str, value: &Value) -> Option<Self> {
        Some(value.clone())
    }

    fn nullable() -> bool {
        true
    }

    fn type_label() -> &'static str {
        "value"
    }
}

impl<T: WireConvert> WireConvert for Option<T> {
    fn to_wire(&self) -> Option<Value> {
        self.as_ref().and_then(WireConvert::to_wire)
    }

    fn from_wire(field: &str, value: &Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_wire(field, value).map(Some)
        }
    }

    fn nullable() -> bool {
        true
    }

    fn type_label() -> &'static str {
        T::type_label()
    }
}

impl<T: WireConvert> WireConvert for Vec<T> {
    fn to_wire(&self) -> Option<Value> {
        Some(Value::Array(self.iter().filter_map(WireConvert::to_wire).collect()))
    }

    fn from_wire(field: &str, value: &Value) -> Option<Self> {
        value
            .as_array()?
            .iter()
            .map(|item| T::from_wire(field, item))
            .collect()
    }

    fn type_label() -> &'static str {
        "array"
    }
}

impl<T: WireConvert> WireConvert for BTreeMap<String, T> {
    fn to_wire(&self) -> Option<Value> {
        Some(Value::Map(
            self.iter()
                .filter_map(|(k, v)| v.to_wire().map(|v| (k.clone(), v)))
                .collect(),
        ))
    }

    fn from_wire(field: &str, value: &Value) -> Option<Self> {
        value
            .as_map()?
            .iter()
            .map(|(k, v)| T::from_wire(field, v).map(|v| (k.clone(), v)))
            .collect()
    }

    fn type_label() -> &'static str {
        "map"
    }
}
