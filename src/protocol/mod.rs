//! Protocol orchestration: the commit cycle, the health cycle and the
//! notifications they emit.

pub mod commit;
pub mod events;
pub mod orchestrator;
pub mod report;

// Re-export commonly used types
pub use events::{FailureSummary, ProtocolEvent, Subsystem};
pub use orchestrator::{
    FlushSummary, Protocol, ProtocolBuilder, ProtocolError, ProtocolSettings, ProtocolState,
};
pub use report::{LatencySummary, ProbeReport, ProtocolReport};
