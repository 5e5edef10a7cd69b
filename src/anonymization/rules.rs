//! Anonymization rule sets.
//!
//! Rules map `(probe_type, field)` to an [`Anonymizer`]. Fields without a
//! rule pass through unchanged.

use crate::anonymization::anonymizer::Anonymizer;
use crate::datum::{catalog, describe, Datum};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const HASH_KEY_CONTEXT: &str = "sensor-relay 2024 field anonymization";

/// A single configured rule, as stored in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub probe_type: String,
    pub field: String,
    pub anonymizer: Anonymizer,
}

/// Errors raised while building a rule set.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleError {
    NotPermitted {
        probe_type: String,
        field: String,
        anonymizer: Anonymizer,
    },
    UnknownField {
        probe_type: String,
        field: String,
    },
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleError::NotPermitted {
                probe_type,
                field,
                anonymizer,
            } => write!(
                f,
                "Anonymizer '{anonymizer}' is not permitted for {probe_type}.{field}"
            ),
            RuleError::UnknownField { probe_type, field } => {
                write!(f, "{probe_type}.{field} is not an anonymizable field")
            }
        }
    }
}

impl std::error::Error for RuleError {}

/// The set of anonymization rules applied before data is stored.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: HashMap<(String, String), Anonymizer>,
    hash_key: [u8; 32],
}

impl RuleSet {
    /// Empty rule set; `salt` keys the hashing anonymizer.
    pub fn new(salt: &str) -> Self {
        Self {
            rules: HashMap::new(),
            hash_key: blake3::derive_key(HASH_KEY_CONTEXT, salt.as_bytes()),
        }
    }

    /// Rule set pre-populated with every catalogued field's default anonymizer.
    pub fn for_catalog(salt: &str) -> Self {
        let mut set = Self::new(salt);
        for kind in catalog() {
            for field in kind.anonymizable {
                if let Some(default) = field.default {
                    set.rules.insert(
                        (kind.probe_type.to_string(), field.field.to_string()),
                        default,
                    );
                }
            }
        }
        set
    }

    /// Build from the catalog defaults plus configured overrides.
    pub fn from_config(salt: &str, rules: &[RuleConfig]) -> Result<Self, RuleError> {
        let mut set = Self::for_catalog(salt);
        for rule in rules {
            set.set(&rule.probe_type, &rule.field, rule.anonymizer)?;
        }
        Ok(set)
    }

    /// Install a rule.
    ///
    /// For catalogued kinds the field must be anonymizable and the anonymizer
    /// one of those it permits. Unknown kinds accept any rule.
    pub fn set(
        &mut self,
        probe_type: &str,
        field: &str,
        anonymizer: Anonymizer,
    ) -> Result<(), RuleError> {
        if let Some(kind) = describe(probe_type) {
            let Some(entry) = kind.field(field) else {
                return Err(RuleError::UnknownField {
                    probe_type: probe_type.to_string(),
                    field: field.to_string(),
                });
            };
            if !entry.allowed.contains(&anonymizer) {
                return Err(RuleError::NotPermitted {
                    probe_type: probe_type.to_string(),
                    field: field.to_string(),
                    anonymizer,
                });
            }
        }

        self.rules
            .insert((probe_type.to_string(), field.to_string()), anonymizer);
        Ok(())
    }

    /// Remove a rule so the field passes through unchanged.
    pub fn clear(&mut self, probe_type: &str, field: &str) {
        self.rules
            .remove(&(probe_type.to_string(), field.to_string()));
    }

    pub fn rule(&self, probe_type: &str, field: &str) -> Option<Anonymizer> {
        self.rules
            .get(&(probe_type.to_string(), field.to_string()))
            .copied()
    }

    /// Rules in a stable order, for display.
    pub fn rules(&self) -> Vec<RuleConfig> {
        let mut out: Vec<RuleConfig> = self
            .rules
            .iter()
            .map(|((probe_type, field), anonymizer)| RuleConfig {
                probe_type: probe_type.clone(),
                field: field.clone(),
                anonymizer: *anonymizer,
            })
            .collect();
        out.sort_by(|a, b| (&a.probe_type, &a.field).cmp(&(&b.probe_type, &b.field)));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply the rules to a datum.
    ///
    /// A datum that is already anonymized is returned untouched, so the
    /// transform can never be stacked.
    pub fn anonymize(&self, datum: Datum) -> Datum {
        if datum.is_anonymized() {
            return datum;
        }

        let mut touched = 0usize;
        let fields: BTreeMap<_, _> = datum
            .fields()
            .iter()
            .map(|(name, value)| {
                match self
                    .rules
                    .get(&(datum.probe_type().to_string(), name.clone()))
                {
                    Some(anonymizer) => {
                        touched += 1;
                        (name.clone(), anonymizer.apply(value, &self.hash_key))
                    }
                    None => (name.clone(), value.clone()),
                }
            })
            .collect();

        if touched > 0 {
            debug!(probe = datum.probe_type(), fields = touched, "Anonymized datum");
        }

        datum.into_anonymized(fields)
    }

    /// Number of fields of `datum` that a rule governs.
    pub fn governed_fields(&self, datum: &Datum) -> usize {
        datum
            .fields()
            .keys()
            .filter(|name| self.rule(datum.probe_type(), name).is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::{FieldValue, LocationReading, Reading, WeightReading};
    use chrono::Utc;

    fn weight(lbs: f64) -> Datum {
        WeightReading {
            timestamp: Utc::now(),
            weight_lbs: lbs,
        }
        .into_datum()
    }

    #[test]
    fn test_no_rule_passes_through() {
        let rules = RuleSet::new("salt");
        let datum = weight(183.4);
        let out = rules.anonymize(datum.clone());

        assert_eq!(out.field("weight_lbs"), datum.field("weight_lbs"));
        assert_eq!(out.id(), datum.id());
        assert!(out.is_anonymized());
    }

    #[test]
    fn test_rule_applied_once() {
        let mut rules = RuleSet::new("salt");
        rules
            .set("weight", "weight_lbs", Anonymizer::Round { granularity: 10.0 })
            .unwrap();

        let once = rules.anonymize(weight(183.4));
        assert_eq!(once.field("weight_lbs"), Some(&FieldValue::Number(180.0)));

        let twice = rules.anonymize(once.clone());
        assert_eq!(twice, once);
    }

    #[test]
    fn test_not_permitted_anonymizer_rejected() {
        let mut rules = RuleSet::new("salt");
        let err = rules
            .set("weight", "weight_lbs", Anonymizer::Hash)
            .unwrap_err();
        assert!(matches!(err, RuleError::NotPermitted { .. }));

        let err = rules
            .set("location", "altitude", Anonymizer::Suppress)
            .unwrap_err();
        assert!(matches!(err, RuleError::UnknownField { .. }));
    }

    #[test]
    fn test_unknown_kind_accepts_any_rule() {
        let mut rules = RuleSet::new("salt");
        rules.set("wifi", "ssid", Anonymizer::Hash).unwrap();
        assert_eq!(rules.rule("wifi", "ssid"), Some(Anonymizer::Hash));
    }

    #[test]
    fn test_from_config_suppresses_location() {
        let config = vec![
            RuleConfig {
                probe_type: "location".to_string(),
                field: "latitude".to_string(),
                anonymizer: Anonymizer::Suppress,
            },
            RuleConfig {
                probe_type: "location".to_string(),
                field: "longitude".to_string(),
                anonymizer: Anonymizer::Round { granularity: 0.01 },
            },
        ];
        let rules = RuleSet::from_config("salt", &config).unwrap();

        let datum = LocationReading {
            timestamp: Utc::now(),
            accuracy: 12.0,
            latitude: 38.0336,
            longitude: -78.5080,
        }
        .into_datum();
        assert_eq!(rules.governed_fields(&datum), 2);

        let out = rules.anonymize(datum);
        assert!(out.field("latitude").unwrap().is_suppressed());
        assert_eq!(out.field("longitude"), Some(&FieldValue::Number(-78.51)));
        assert_eq!(out.field("accuracy"), Some(&FieldValue::Number(12.0)));
    }

    #[test]
    fn test_same_input_same_bytes() {
        let mut rules = RuleSet::new("protocol-1");
        rules.set("wifi", "ssid", Anonymizer::Hash).unwrap();
        let datum = Datum::new(
            "wifi",
            Utc::now(),
            vec![("ssid".to_string(), FieldValue::from("home-net"))],
        );

        let a = rules.anonymize(datum.clone()).to_json_bytes().unwrap();
        let b = rules.anonymize(datum).to_json_bytes().unwrap();
        assert_eq!(a, b);
    }
}
