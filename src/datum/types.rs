//! Datum records: immutable, timestamped readings produced by probes.
//!
//! A datum is the unit that flows through the whole pipeline. Once a probe
//! has built one it is never mutated in place; anonymization produces a new
//! value and the stores only move records around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single field value inside a datum.
///
/// `Suppressed` is the sentinel left behind when an anonymization rule
/// removes a field. It serializes as JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Suppressed,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, FieldValue::Suppressed)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Suppressed => write!(f, "<suppressed>"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// One immutable reading.
///
/// Fields are kept in a sorted map so that serializing the same datum twice
/// always yields the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    id: Uuid,
    probe_type: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    anonymized: bool,
    fields: BTreeMap<String, FieldValue>,
}

impl Datum {
    /// Build a datum with a fresh identifier.
    pub fn new(
        probe_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        fields: impl IntoIterator<Item = (String, FieldValue)>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            probe_type: probe_type.into(),
            timestamp,
            anonymized: false,
            fields: fields.into_iter().collect(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn probe_type(&self) -> &str {
        &self.probe_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_anonymized(&self) -> bool {
        self.anonymized
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Produce the anonymized form of this datum. Identity and timestamp are kept.
    pub(crate) fn into_anonymized(mut self, fields: BTreeMap<String, FieldValue>) -> Self {
        self.fields = fields;
        self.anonymized = true;
        self
    }

    /// Serialize to the wire/storage representation.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Short human-readable rendering for status output.
    pub fn display_detail(&self) -> String {
        self.fields
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppressed_serializes_as_null() {
        let datum = Datum::new(
            "weight",
            Utc::now(),
            vec![("weight_lbs".to_string(), FieldValue::Suppressed)],
        );
        let json: serde_json::Value =
            serde_json::from_slice(&datum.to_json_bytes().unwrap()).unwrap();
        assert!(json["fields"]["weight_lbs"].is_null());

        let back: Datum = serde_json::from_value(json).unwrap();
        assert_eq!(back.field("weight_lbs"), Some(&FieldValue::Suppressed));
    }

    #[test]
    fn test_fields_serialize_in_name_order() {
        let datum = Datum::new(
            "accelerometer",
            Utc::now(),
            vec![
                ("z".to_string(), FieldValue::Number(3.0)),
                ("x".to_string(), FieldValue::Number(1.0)),
                ("y".to_string(), FieldValue::Number(2.0)),
            ],
        );
        let text = String::from_utf8(datum.to_json_bytes().unwrap()).unwrap();
        let x = text.find("\"x\"").unwrap();
        let y = text.find("\"y\"").unwrap();
        let z = text.find("\"z\"").unwrap();
        assert!(x < y && y < z);
    }

    #[test]
    fn test_datum_ids_are_unique() {
        let a = Datum::new("compass", Utc::now(), Vec::new());
        let b = Datum::new("compass", Utc::now(), Vec::new());
        assert_ne!(a.id(), b.id());
    }
}
