//! Transparency reporting for the sensor relay.
//!
//! Tracks how much data the relay handled so users can see what left the
//! device, without the log itself holding any sensor values.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
