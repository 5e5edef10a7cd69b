//! Sensor Relay - privacy-first on-device sensor collection.
//!
//! Probes read device sensors, every datum is anonymized once, buffered in
//! a durable local store, and committed in batches to a remote object store.
//! Nothing is lost when the network or the remote sink is unavailable:
//! unacknowledged records stay pending across commit cycles and restarts.
//!
//! # Privacy Guarantees
//!
//! - **Anonymize first**: rules run before a datum is stored, never on retry
//! - **Bounded precision**: each field only permits the anonymizers listed
//!   in its datum kind's catalog entry
//! - **Same bytes everywhere**: the stored record is exactly what is uploaded
//! - **Transparency**: counts of stored and committed data are logged
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Protocol                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────┐            │
//! │  │   Probes    │──▶│ Anonymizer  │──▶│  Local Data  │            │
//! │  │ poll/listen │   │  rule set   │   │    Store     │            │
//! │  └─────────────┘   └─────────────┘   └──────────────┘            │
//! │         ▲                                   │ drain / ack         │
//! │         │ health cycle                      ▼                     │
//! │  ┌─────────────┐                    ┌──────────────┐             │
//! │  │Transparency │                    │ Remote Data  │             │
//! │  │    Log      │                    │    Store     │             │
//! │  └─────────────┘                    └──────────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sensor_relay::{
//!     probe::{PollingProbe, SimulatedAccelerometer},
//!     protocol::{Protocol, ProtocolSettings},
//!     remote::{DirectoryTransport, ObjectStoreRemote},
//!     store::{FileMedium, LocalDataStore},
//! };
//!
//! let settings = ProtocolSettings::default();
//! let store = Arc::new(LocalDataStore::open(FileMedium::open("pending.log", false)?)?);
//! let remote = ObjectStoreRemote::new(DirectoryTransport::new("uploads"), "study", &settings.id);
//!
//! let protocol = Protocol::builder(settings, store)
//!     .probe(PollingProbe::new(SimulatedAccelerometer::new(), Duration::from_secs(1)))
//!     .remote(remote)
//!     .build()?;
//! protocol.start()?;
//! // ...
//! protocol.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod anonymization;
pub mod config;
pub mod datum;
pub mod probe;
pub mod protocol;
pub mod remote;
pub mod store;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use anonymization::{Anonymizer, RuleConfig, RuleError, RuleSet};
pub use config::{BackoffConfig, Config, ConfigError, ProbeSelection, RemoteConfig, RemoteTarget};
pub use datum::{Datum, FieldValue, Reading};
pub use probe::{Probe, ProbeError, ProbeKind, ProbeState};
pub use protocol::{
    FailureSummary, Protocol, ProtocolError, ProtocolEvent, ProtocolReport, ProtocolSettings,
    ProtocolState, Subsystem,
};
pub use remote::{CommitOutcome, ObjectStoreRemote, RemoteDataStore, RemoteError};
pub use store::{LocalDataStore, StoreError};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

#[cfg(feature = "http")]
pub use remote::{HttpConfig, HttpTransport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Data handling declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║              SENSOR RELAY - DATA HANDLING DECLARATION            ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This relay collects device sensor readings for a study.         ║
║                                                                  ║
║  ✓ WHAT WE COLLECT:                                              ║
║    • Motion (accelerometer) and heading (compass)                ║
║    • Location, rounded to the precision the rules allow          ║
║                                                                  ║
║  ✓ HOW IT IS HANDLED:                                            ║
║    • Anonymization rules run before anything is stored           ║
║    • Data waits on this device until the server confirms it      ║
║    • Uploaded records are identical to the stored records        ║
║                                                                  ║
║  ✗ WHAT WE NEVER DO:                                             ║
║    • Upload a field at higher precision than its rule permits    ║
║    • Keep sensor values in the transparency log                  ║
║                                                                  ║
║  You can view the active rules anytime with:                     ║
║    sensor-relay rules                                            ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_declaration_contents() {
        assert!(PRIVACY_DECLARATION.contains("DATA HANDLING"));
        assert!(PRIVACY_DECLARATION.contains("NEVER DO"));
        assert!(PRIVACY_DECLARATION.contains("sensor-relay rules"));
    }
}
