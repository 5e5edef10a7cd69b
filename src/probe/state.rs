//! Probe lifecycle types shared by the polling and listening probes.

use crate::datum::Datum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Probe lifecycle state.
///
/// `Failed` is soft: the protocol's health cycle will try to start the
/// probe again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl ProbeState {
    fn to_u8(self) -> u8 {
        match self {
            ProbeState::Stopped => 0,
            ProbeState::Starting => 1,
            ProbeState::Running => 2,
            ProbeState::Stopping => 3,
            ProbeState::Failed => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ProbeState::Starting,
            2 => ProbeState::Running,
            3 => ProbeState::Stopping,
            4 => ProbeState::Failed,
            _ => ProbeState::Stopped,
        }
    }
}

impl std::fmt::Display for ProbeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProbeState::Stopped => "stopped",
            ProbeState::Starting => "starting",
            ProbeState::Running => "running",
            ProbeState::Stopping => "stopping",
            ProbeState::Failed => "failed",
        };
        f.pad(s)
    }
}

/// How a probe obtains readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeKind {
    Poll { interval_ms: u64 },
    Listen,
}

/// Probe errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// The underlying sensor is absent or disabled. Retryable.
    Unsupported(String),
    /// The sensor source failed in some other way.
    Source(String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Unsupported(msg) => write!(f, "Unsupported capability: {msg}"),
            ProbeError::Source(msg) => write!(f, "Sensor source error: {msg}"),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Where probes deliver their datums. Must be safe for concurrent callers.
pub trait DatumSink: Send + Sync {
    fn store(&self, datum: Datum);
}

/// A data-producing state machine owned by a protocol.
pub trait Probe: Send + Sync {
    fn probe_type(&self) -> &'static str;

    fn kind(&self) -> ProbeKind;

    fn state(&self) -> ProbeState;

    fn last_reading_at(&self) -> Option<DateTime<Utc>>;

    /// Start delivering datums to `sink`.
    ///
    /// Starting a probe that is already running is a no-op. On
    /// `ProbeError::Unsupported` the probe is left `Failed`.
    fn start(&self, sink: Arc<dyn DatumSink>) -> Result<(), ProbeError>;

    /// Stop the probe and release its timer or subscription. Idempotent.
    fn stop(&self);
}

/// State visible to both a probe and its worker thread or handler.
#[derive(Debug)]
pub(crate) struct ProbeShared {
    state: AtomicU8,
    last_reading: Mutex<Option<DateTime<Utc>>>,
}

impl ProbeShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(ProbeState::Stopped.to_u8()),
            last_reading: Mutex::new(None),
        })
    }

    pub(crate) fn state(&self) -> ProbeState {
        ProbeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ProbeState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == ProbeState::Running
    }

    pub(crate) fn touch(&self, at: DateTime<Utc>) {
        *self
            .last_reading
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub(crate) fn last_reading(&self) -> Option<DateTime<Utc>> {
        *self
            .last_reading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_atomic() {
        let shared = ProbeShared::new();
        for state in [
            ProbeState::Starting,
            ProbeState::Running,
            ProbeState::Stopping,
            ProbeState::Failed,
            ProbeState::Stopped,
        ] {
            shared.set_state(state);
            assert_eq!(shared.state(), state);
        }
    }

    #[test]
    fn test_probe_kind_serde() {
        let json = serde_json::to_string(&ProbeKind::Poll { interval_ms: 500 }).unwrap();
        assert_eq!(json, r#"{"kind":"poll","interval_ms":500}"#);
    }
}
