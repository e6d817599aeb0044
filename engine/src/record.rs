//! Record type - a keyed set of fields synchronized as a unit.

use crate::{error::Result, Error, RecordKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the field holding a record's primary key.
pub const KEY_FIELD: &str = "_key";

/// A single keyed record.
///
/// Fields are held in a `BTreeMap`, so iteration is always in lexicographic
/// key order regardless of insertion order. This makes checksum serialization
/// canonical and keeps per-read iteration stable for checkpointing.
///
/// Identity is the string value of the [`KEY_FIELD`] field. A record without
/// that field has the empty key, matching how upstream stores treat keyless
/// rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, serde_json::Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Build a record from a JSON value, which must be an object.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Self {
                fields: map.into_iter().collect(),
            }),
            other => Err(Error::InvalidRecord(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Build a record from an iterator of field name / value pairs.
    pub fn from_fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        }
    }

    /// The primary key of this record, or `""` if the key field is absent
    /// or not a string.
    pub fn key(&self) -> &str {
        self.fields
            .get(KEY_FIELD)
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }

    /// The primary key as an owned [`RecordKey`].
    pub fn key_owned(&self) -> RecordKey {
        self.key().to_string()
    }

    /// Get a field value by name.
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// Set a field value, returning the previous value if any.
    pub fn insert(
        &mut self,
        field: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.fields.insert(field.into(), value)
    }

    /// Remove a field, returning its value if it was present.
    pub fn remove(&mut self, field: &str) -> Option<serde_json::Value> {
        self.fields.remove(field)
    }

    /// Check whether a field is present.
    pub fn contains_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Iterate over fields in lexicographic key order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.fields.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Convert back into a JSON object value.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        serde_json::Value::Number(_) => "float",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
