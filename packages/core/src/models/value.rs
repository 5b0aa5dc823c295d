//! Canonical Value Model
//!
//! Every column value produced by any engine is normalized into exactly one
//! `CanonicalValue` variant. Binary and textual data stay distinct: a BLOB
//! column never turns into `Text`, and a text column never turns into `Blob`.
//!
//! # Wire Encoding
//!
//! | Variant     | JSON                                   |
//! |-------------|----------------------------------------|
//! | `Null`      | `null`                                 |
//! | `Integer`   | number                                 |
//! | `Float`     | number (`null` when not finite)        |
//! | `Text`      | string                                 |
//! | `Blob`      | base64 string (standard alphabet)      |
//! | `Timestamp` | string `YYYY-MM-DD HH:MM:SS`           |

use base64::Engine as _;
use chrono::{NaiveDateTime, Timelike};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Format used for timestamps on the wire and in exported scripts
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Backend-independent representation of a single column value
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Civil date-time, truncated to whole seconds
    Timestamp(NaiveDateTime),
}

impl CanonicalValue {
    /// Build a timestamp, dropping sub-second precision
    pub fn timestamp(at: NaiveDateTime) -> Self {
        CanonicalValue::Timestamp(at.with_nanosecond(0).unwrap_or(at))
    }

    /// Convert a caller-supplied JSON scalar into a bindable value
    ///
    /// Booleans bind as 0/1. Integers beyond `i64` bind as floats.
    /// Arrays and objects are not scalars and are rejected (`None`).
    pub fn from_json_scalar(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Null => Some(CanonicalValue::Null),
            Value::Bool(b) => Some(CanonicalValue::Integer(i64::from(*b))),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(CanonicalValue::Integer(i))
                } else {
                    n.as_f64().map(CanonicalValue::Float)
                }
            }
            Value::String(s) => Some(CanonicalValue::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CanonicalValue::Null)
    }

    /// Short variant name for logs and error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            CanonicalValue::Null => "null",
            CanonicalValue::Integer(_) => "integer",
            CanonicalValue::Float(_) => "float",
            CanonicalValue::Text(_) => "text",
            CanonicalValue::Blob(_) => "blob",
            CanonicalValue::Timestamp(_) => "timestamp",
        }
    }
}

impl Serialize for CanonicalValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CanonicalValue::Null => serializer.serialize_unit(),
            CanonicalValue::Integer(i) => serializer.serialize_i64(*i),
            CanonicalValue::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            CanonicalValue::Float(_) => serializer.serialize_unit(),
            CanonicalValue::Text(s) => serializer.serialize_str(s),
            CanonicalValue::Blob(bytes) => serializer
                .serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes)),
            CanonicalValue::Timestamp(at) => {
                serializer.collect_str(&at.format(TIMESTAMP_FORMAT))
            }
        }
    }
}

/// Ordered mapping from column name to value
///
/// Insertion order equals the engine's column order. A repeated column name
/// keeps its first position and takes the latest value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, CanonicalValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Append a column, replacing the value of an existing column with the same name
    pub fn push(&mut self, name: impl Into<String>, value: CanonicalValue) {
        let name = name.into();
        match self.columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CanonicalValue> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &CanonicalValue> {
        self.columns.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CanonicalValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn into_values(self) -> Vec<CanonicalValue> {
        self.columns.into_iter().map(|(_, value)| value).collect()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Ordered rows exactly as the engine returned them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(row)?;
        }
        seq.end()
    }
}
