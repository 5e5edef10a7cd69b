//! On-device buffering of anonymized data.

pub mod error;
pub mod local;
pub mod medium;

// Re-export commonly used types
pub use error::{CorruptRecord, StoreError};
pub use local::{Batch, LocalDataStore, Settled};
pub use medium::{FileMedium, MemoryMedium, Recovered, StorageMedium};
