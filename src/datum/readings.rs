//! Typed readings for the built-in probe kinds.
//!
//! Each reading knows how to flatten itself into datum fields and declares,
//! statically, which of its fields may be anonymized and how.

use crate::anonymization::Anonymizer;
use crate::datum::types::{Datum, FieldValue};
use chrono::{DateTime, Utc};

/// A field that anonymization rules may target.
#[derive(Debug, Clone, Copy)]
pub struct AnonymizableField {
    pub field: &'static str,
    /// Anonymizers a rule for this field may use
    pub allowed: &'static [Anonymizer],
    /// Applied when no explicit rule is configured
    pub default: Option<Anonymizer>,
}

/// A typed sensor reading that can be turned into a [`Datum`].
pub trait Reading: Send + 'static {
    /// Probe type name carried by every datum of this kind.
    const PROBE_TYPE: &'static str;

    /// Fields open to anonymization rules.
    const ANONYMIZABLE: &'static [AnonymizableField] = &[];

    fn timestamp(&self) -> DateTime<Utc>;

    fn fields(&self) -> Vec<(&'static str, FieldValue)>;

    fn display_detail(&self) -> String;

    fn into_datum(self) -> Datum
    where
        Self: Sized,
    {
        Datum::new(
            Self::PROBE_TYPE,
            self.timestamp(),
            self.fields()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value)),
        )
    }
}

/// Catalog entry describing one datum kind.
#[derive(Debug, Clone, Copy)]
pub struct KindDescriptor {
    pub probe_type: &'static str,
    pub anonymizable: &'static [AnonymizableField],
}

impl KindDescriptor {
    pub fn of<R: Reading>() -> Self {
        Self {
            probe_type: R::PROBE_TYPE,
            anonymizable: R::ANONYMIZABLE,
        }
    }

    pub fn field(&self, name: &str) -> Option<&AnonymizableField> {
        self.anonymizable.iter().find(|f| f.field == name)
    }
}

/// All datum kinds known to this build.
pub fn catalog() -> [KindDescriptor; 4] {
    [
        KindDescriptor::of::<AccelerometerReading>(),
        KindDescriptor::of::<LocationReading>(),
        KindDescriptor::of::<CompassReading>(),
        KindDescriptor::of::<WeightReading>(),
    ]
}

/// Look up a catalogued kind by probe type.
pub fn describe(probe_type: &str) -> Option<KindDescriptor> {
    catalog().into_iter().find(|k| k.probe_type == probe_type)
}

const ROUND_TENTHS: Anonymizer = Anonymizer::Round { granularity: 0.1 };
const ROUND_HUNDREDTHS: Anonymizer = Anonymizer::Round { granularity: 0.01 };
const ROUND_ONES: Anonymizer = Anonymizer::Round { granularity: 1.0 };
const ROUND_TENS: Anonymizer = Anonymizer::Round { granularity: 10.0 };

/// Three-axis acceleration.
#[derive(Debug, Clone, PartialEq)]
pub struct AccelerometerReading {
    pub timestamp: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Reading for AccelerometerReading {
    const PROBE_TYPE: &'static str = "accelerometer";

    const ANONYMIZABLE: &'static [AnonymizableField] = &[
        AnonymizableField {
            field: "x",
            allowed: &[ROUND_TENTHS, ROUND_ONES],
            default: None,
        },
        AnonymizableField {
            field: "y",
            allowed: &[ROUND_TENTHS, ROUND_ONES],
            default: None,
        },
        AnonymizableField {
            field: "z",
            allowed: &[ROUND_TENTHS, ROUND_ONES],
            default: None,
        },
    ];

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("x", self.x.into()),
            ("y", self.y.into()),
            ("z", self.z.into()),
        ]
    }

    fn display_detail(&self) -> String {
        format!(
            "{:.2} (x), {:.2} (y), {:.2} (z)",
            self.x, self.y, self.z
        )
    }
}

/// GPS fix.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationReading {
    pub timestamp: DateTime<Utc>,
    pub accuracy: f64,
    pub latitude: f64,
    pub longitude: f64,
}

impl Reading for LocationReading {
    const PROBE_TYPE: &'static str = "location";

    const ANONYMIZABLE: &'static [AnonymizableField] = &[
        AnonymizableField {
            field: "latitude",
            allowed: &[ROUND_HUNDREDTHS, ROUND_TENTHS, Anonymizer::Suppress],
            default: None,
        },
        AnonymizableField {
            field: "longitude",
            allowed: &[ROUND_HUNDREDTHS, ROUND_TENTHS, Anonymizer::Suppress],
            default: None,
        },
        AnonymizableField {
            field: "accuracy",
            allowed: &[ROUND_TENS],
            default: None,
        },
    ];

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("accuracy", self.accuracy.into()),
            ("latitude", self.latitude.into()),
            ("longitude", self.longitude.into()),
        ]
    }

    fn display_detail(&self) -> String {
        format!(
            "{:.5} (lat), {:.5} (lon), ±{:.0}m",
            self.latitude, self.longitude, self.accuracy
        )
    }
}

/// Compass heading in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct CompassReading {
    pub timestamp: DateTime<Utc>,
    pub heading: f64,
}

impl Reading for CompassReading {
    const PROBE_TYPE: &'static str = "compass";

    const ANONYMIZABLE: &'static [AnonymizableField] = &[AnonymizableField {
        field: "heading",
        allowed: &[ROUND_ONES, ROUND_TENS],
        default: None,
    }];

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![("heading", self.heading.into())]
    }

    fn display_detail(&self) -> String {
        format!("{:.1}°", self.heading)
    }
}

/// Body weight, self-reported or from a paired scale.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightReading {
    pub timestamp: DateTime<Utc>,
    pub weight_lbs: f64,
}

impl Reading for WeightReading {
    const PROBE_TYPE: &'static str = "weight";

    const ANONYMIZABLE: &'static [AnonymizableField] = &[AnonymizableField {
        field: "weight_lbs",
        allowed: &[ROUND_TENS],
        default: None,
    }];

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![("weight_lbs", self.weight_lbs.into())]
    }

    fn display_detail(&self) -> String {
        format!("Weight (lbs): {:.1}", self.weight_lbs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_into_datum() {
        let reading = AccelerometerReading {
            timestamp: Utc::now(),
            x: 1.0,
            y: -2.5,
            z: 9.81,
        };
        let ts = reading.timestamp;
        let datum = reading.into_datum();

        assert_eq!(datum.probe_type(), "accelerometer");
        assert_eq!(datum.timestamp(), ts);
        assert_eq!(datum.field("y"), Some(&FieldValue::Number(-2.5)));
        assert!(!datum.is_anonymized());
    }

    #[test]
    fn test_catalog_lookup() {
        let weight = describe("weight").unwrap();
        let field = weight.field("weight_lbs").unwrap();
        assert_eq!(field.allowed, &[Anonymizer::Round { granularity: 10.0 }]);
        assert!(describe("barometer").is_none());
    }
}
