//! Field-level anonymizers.
//!
//! Every anonymizer is a deterministic, one-way map over a single field
//! value. Applying the same anonymizer to the same value always gives the
//! same output, so resending a record never changes its payload.

use crate::datum::FieldValue;
use serde::{Deserialize, Serialize};

/// A transform applied to one datum field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anonymizer {
    /// Remove the value, leaving the suppression sentinel (`null`)
    Suppress,
    /// Round a numeric value to the nearest multiple of `granularity`
    Round { granularity: f64 },
    /// Replace the value with a keyed blake3 digest (hex)
    Hash,
}

impl Anonymizer {
    pub fn apply(&self, value: &FieldValue, hash_key: &[u8; 32]) -> FieldValue {
        match self {
            Anonymizer::Suppress => FieldValue::Suppressed,
            Anonymizer::Round { granularity } => match value {
                FieldValue::Number(n) => FieldValue::Number(round_to(*n, *granularity)),
                other => other.clone(),
            },
            Anonymizer::Hash => {
                let text = match value {
                    FieldValue::Suppressed => return FieldValue::Suppressed,
                    FieldValue::Bool(b) => b.to_string(),
                    FieldValue::Number(n) => n.to_string(),
                    FieldValue::Text(s) => s.clone(),
                };
                FieldValue::Text(blake3::keyed_hash(hash_key, text.as_bytes()).to_hex().to_string())
            }
        }
    }
}

impl std::fmt::Display for Anonymizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anonymizer::Suppress => write!(f, "suppress"),
            Anonymizer::Round { granularity } => write!(f, "round to {granularity}"),
            Anonymizer::Hash => write!(f, "hash"),
        }
    }
}

/// Round `value` to the nearest multiple of `granularity`.
///
/// The result is snapped to the decimal places of the granularity itself so
/// that e.g. rounding to 0.1 yields 12.3 rather than 12.300000000000001,
/// and rounding to 0.25 stays on the quarter grid.
fn round_to(value: f64, granularity: f64) -> f64 {
    if !value.is_finite() || granularity <= 0.0 || !granularity.is_finite() {
        return value;
    }

    let rounded = (value / granularity).round() * granularity;

    match decimal_places(granularity) {
        0 => rounded,
        places => {
            let scale = 10f64.powi(places);
            (rounded * scale).round() / scale
        }
    }
}

/// Fractional digits in the shortest decimal form of `granularity`.
fn decimal_places(granularity: f64) -> i32 {
    const MAX_PLACES: usize = 15;
    granularity
        .to_string()
        .split_once('.')
        .map_or(0, |(_, fraction)| fraction.len().min(MAX_PLACES) as i32)
}
