//! Datum records and the typed readings that produce them.

pub mod readings;
pub mod types;

// Re-export commonly used types
pub use readings::{
    catalog, describe, AccelerometerReading, AnonymizableField, CompassReading, KindDescriptor,
    LocationReading, Reading, WeightReading,
};
pub use types::{Datum, FieldValue};
