//! Probes turn sensor sources into datums.
//!
//! A probe is either polled on a timer or driven by a listener callback.
//! Both kinds share the same state machine and deliver to a [`DatumSink`].

pub mod listening;
pub mod polling;
pub mod simulated;
pub mod source;
pub mod state;

// Re-export commonly used types
pub use listening::ListeningProbe;
pub use polling::PollingProbe;
pub use simulated::{SimulatedAccelerometer, SimulatedCompass, SimulatedLocation};
pub use source::{Capability, ListenSource, PollSource, ReadingHandler, SubscriptionHandle};
pub use state::{DatumSink, Probe, ProbeError, ProbeKind, ProbeState};
