//! Read-only notifications for a presentation layer.

use crate::probe::ProbeState;
use crate::protocol::report::ProtocolReport;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// The part of the relay a failure is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Subsystem {
    Probe(String),
    RemoteSink(String),
    LocalStore,
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subsystem::Probe(probe) => write!(f, "{probe} probe"),
            Subsystem::RemoteSink(name) => write!(f, "remote sink ({name})"),
            Subsystem::LocalStore => write!(f, "local data store"),
        }
    }
}

/// User-visible summary of a failure: what was affected and a one-line message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub subsystem: Subsystem,
    pub message: String,
}

impl FailureSummary {
    pub fn new(subsystem: Subsystem, message: impl Into<String>) -> Self {
        Self {
            subsystem,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FailureSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.subsystem, self.message)
    }
}

/// Notifications emitted by a running protocol.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    ProbeStateChanged {
        probe_type: String,
        state: ProbeState,
        failure: Option<FailureSummary>,
    },
    RemoteStateChanged {
        running: bool,
        failure: Option<FailureSummary>,
    },
    CommitSucceeded {
        committed: usize,
    },
    /// Some or all of a batch was not acknowledged and was requeued
    CommitFailed {
        committed: usize,
        requeued: usize,
        failure: FailureSummary,
    },
    /// A record has been retried often enough to look permanently invalid
    SuspectRecord {
        id: Uuid,
        attempts: u32,
    },
    ReportGenerated(ProtocolReport),
    /// The protocol halted on an unrecoverable error
    Fatal(FailureSummary),
    Stopped,
}

/// Fan-out of events to any number of subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<Sender<ProtocolEvent>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> Receiver<ProtocolEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub(crate) fn publish(&self, event: ProtocolEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_summary_display() {
        let summary = FailureSummary::new(
            Subsystem::Probe("location".into()),
            "location services is not enabled on this device",
        );
        assert_eq!(
            summary.to_string(),
            "location probe: location services is not enabled on this device"
        );
    }

    #[test]
    fn test_bus_prunes_dropped_subscribers() {
        let bus = EventBus::default();
        let kept = bus.subscribe();
        let dropped = bus.subscribe();
        drop(dropped);

        bus.publish(ProtocolEvent::CommitSucceeded { committed: 3 });
        assert!(matches!(
            kept.try_recv(),
            Ok(ProtocolEvent::CommitSucceeded { committed: 3 })
        ));
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_subsystem_serde() {
        let json = serde_json::to_string(&Subsystem::RemoteSink("object store".into())).unwrap();
        assert_eq!(json, r#"{"kind":"remote_sink","name":"object store"}"#);
    }
}
