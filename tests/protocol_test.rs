//! Integration tests for protocol lifecycle, recovery and shutdown

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use sensor_relay::config::BackoffConfig;
use sensor_relay::datum::{Datum, Reading, WeightReading};
use sensor_relay::probe::{
    Capability, ListeningProbe, PollSource, PollingProbe, ProbeError, ProbeState,
    SimulatedAccelerometer, SimulatedCompass,
};
use sensor_relay::protocol::{Protocol, ProtocolEvent, ProtocolSettings, Subsystem};
use sensor_relay::remote::{ObjectStoreRemote, ObjectTransport, TransportError};
use sensor_relay::store::{FileMedium, LocalDataStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Scale {
    capability: Capability,
}

impl PollSource for Scale {
    type Reading = WeightReading;

    fn check_available(&mut self) -> Result<(), ProbeError> {
        self.capability.check()
    }

    fn read(&mut self) -> Option<WeightReading> {
        Some(WeightReading {
            timestamp: Utc::now(),
            weight_lbs: 163.0,
        })
    }
}

#[derive(Default)]
struct OutageTransport {
    down: AtomicBool,
    keys: Mutex<Vec<String>>,
}

impl OutageTransport {
    fn offline() -> Arc<Self> {
        let transport = Self::default();
        transport.down.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    fn key_count(&self) -> usize {
        self.keys.lock().unwrap().len()
    }
}

impl ObjectTransport for OutageTransport {
    fn ensure_container_exists(&self, _container: &str) -> Result<(), TransportError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::Network("host unreachable".into()));
        }
        Ok(())
    }

    fn put(&self, _container: &str, key: &str, _payload: &[u8]) -> Result<(), TransportError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::Network("host unreachable".into()));
        }
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// Accepts containers but never answers a put until the gate closes.
struct StalledTransport {
    gate: Receiver<()>,
}

impl StalledTransport {
    fn new() -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = bounded(0);
        (Arc::new(Self { gate: rx }), tx)
    }
}

impl ObjectTransport for StalledTransport {
    fn ensure_container_exists(&self, _container: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn put(&self, _container: &str, _key: &str, _payload: &[u8]) -> Result<(), TransportError> {
        let _ = self.gate.recv_timeout(Duration::from_secs(10));
        Err(TransportError::Network("request timed out".into()))
    }
}

fn fast_settings() -> ProtocolSettings {
    ProtocolSettings {
        commit_interval: Duration::from_millis(20),
        health_check_interval: Duration::from_millis(40),
        shutdown_timeout: Duration::from_secs(2),
        max_batch_size: 50,
        backoff: BackoffConfig::fixed_interval(),
        ..ProtocolSettings::default()
    }
}

fn idle_settings() -> ProtocolSettings {
    ProtocolSettings {
        commit_interval: Duration::from_secs(3600),
        health_check_interval: Duration::from_secs(3600),
        ..fast_settings()
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not met in time");
}

fn weight(lbs: f64) -> Datum {
    WeightReading {
        timestamp: Utc::now(),
        weight_lbs: lbs,
    }
    .into_datum()
}

fn stored_count(store: &LocalDataStore, probe_type: &str) -> usize {
    store
        .peek_pending(usize::MAX)
        .iter()
        .filter(|d| d.probe_type() == probe_type)
        .count()
}

#[test]
fn test_unsupported_probe_recovers_on_health_check() {
    let store = Arc::new(LocalDataStore::in_memory());
    let capability = Capability::new("bluetooth scale", false);
    let protocol = Protocol::builder(idle_settings(), store.clone())
        .probe(PollingProbe::new(
            Scale {
                capability: capability.clone(),
            },
            Duration::from_millis(10),
        ))
        .probe(PollingProbe::new(
            SimulatedAccelerometer::new(),
            Duration::from_millis(10),
        ))
        .build()
        .unwrap();
    let events = protocol.subscribe();

    protocol.start().unwrap();

    let states: Vec<(String, ProbeState)> = protocol
        .probes()
        .iter()
        .map(|p| (p.probe_type().to_string(), p.state()))
        .collect();
    assert!(states.contains(&("weight".to_string(), ProbeState::Failed)));
    assert!(states.contains(&("accelerometer".to_string(), ProbeState::Running)));

    let failure = events
        .try_iter()
        .find_map(|event| match event {
            ProtocolEvent::ProbeStateChanged {
                failure: Some(failure),
                ..
            } => Some(failure),
            _ => None,
        })
        .expect("probe failure event");
    assert_eq!(failure.subsystem, Subsystem::Probe("weight".to_string()));

    // The working probe is unaffected by its failed sibling.
    wait_for(|| stored_count(&store, "accelerometer") >= 3);
    assert_eq!(stored_count(&store, "weight"), 0);

    capability.set_enabled(true);
    protocol.health_check_now();

    let weight_probe = protocol
        .probes()
        .iter()
        .find(|p| p.probe_type() == "weight")
        .unwrap();
    assert_eq!(weight_probe.state(), ProbeState::Running);
    wait_for(|| stored_count(&store, "weight") >= 2);

    let report = events
        .try_iter()
        .find_map(|event| match event {
            ProtocolEvent::ReportGenerated(report) => Some(report),
            _ => None,
        })
        .expect("report event");
    assert_eq!(report.probes.len(), 2);
    assert_eq!(report.remote_running, None);

    protocol.stop();
    assert!(protocol
        .probes()
        .iter()
        .all(|p| p.state() == ProbeState::Stopped));
}

#[test]
fn test_remote_outage_buffers_then_drains() {
    let store = Arc::new(LocalDataStore::in_memory());
    let transport = OutageTransport::offline();
    let protocol = Protocol::builder(fast_settings(), store.clone())
        .probe(PollingProbe::new(
            Scale {
                capability: Capability::new("bluetooth scale", true),
            },
            Duration::from_millis(10),
        ))
        .remote(ObjectStoreRemote::with_device_id(
            transport.clone(),
            "study",
            "p1",
            "dev",
        ))
        .build()
        .unwrap();
    let events = protocol.subscribe();

    protocol.start().unwrap();
    assert_eq!(protocol.report().remote_running, Some(false));

    // Data keeps being stored while the remote is unreachable.
    wait_for(|| store.pending_len() >= 5);
    assert_eq!(transport.key_count(), 0);

    transport.down.store(false, Ordering::SeqCst);
    wait_for(|| transport.key_count() >= 5);
    assert_eq!(protocol.report().remote_running, Some(true));

    protocol.stop();

    // The final commit drained everything the probe produced before stopping.
    let stats = protocol.transparency().stats();
    assert_eq!(store.pending_len(), 0);
    assert_eq!(store.checked_out_len(), 0);
    assert_eq!(transport.key_count() as u64, stats.stored);
    assert_eq!(stats.committed, stats.stored);

    let keys = transport.keys.lock().unwrap().clone();
    let unique: HashSet<&String> = keys.iter().collect();
    assert_eq!(unique.len(), keys.len());

    let received: Vec<ProtocolEvent> = events.try_iter().collect();
    assert!(received.iter().any(|e| matches!(
        e,
        ProtocolEvent::RemoteStateChanged {
            running: false,
            failure: Some(_)
        }
    )));
    assert!(received.iter().any(|e| matches!(
        e,
        ProtocolEvent::RemoteStateChanged {
            running: true,
            failure: None
        }
    )));
    assert!(matches!(received.last(), Some(ProtocolEvent::Stopped)));
}

#[test]
fn test_listening_probe_feeds_protocol() {
    let store = Arc::new(LocalDataStore::in_memory());
    let protocol = Protocol::builder(idle_settings(), store.clone())
        .probe(ListeningProbe::new(SimulatedCompass::new(Duration::from_millis(5))))
        .build()
        .unwrap();

    protocol.start().unwrap();
    wait_for(|| stored_count(&store, "compass") >= 3);
    protocol.stop();

    let after_stop = store.pending_len();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(store.pending_len(), after_stop);
    assert_eq!(
        protocol.transparency().stored_for("compass"),
        after_stop as u64
    );
}

#[test]
fn test_stop_is_bounded_when_final_commit_stalls() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pending.log");
    let store = Arc::new(LocalDataStore::open(FileMedium::open(&path, true).unwrap()).unwrap());
    for lbs in [150.0, 151.0, 152.0] {
        store.append(weight(lbs)).unwrap();
    }

    let (transport, gate) = StalledTransport::new();
    let protocol = Protocol::builder(
        ProtocolSettings {
            shutdown_timeout: Duration::from_millis(200),
            ..idle_settings()
        },
        store,
    )
    .remote(ObjectStoreRemote::with_device_id(
        transport,
        "study",
        "p1",
        "dev",
    ))
    .build()
    .unwrap();

    protocol.start().unwrap();
    let started = Instant::now();
    protocol.stop();
    assert!(started.elapsed() < Duration::from_secs(2));

    // Nothing was acknowledged, so a restart recovers every record.
    let recovered = FileMedium::inspect(&path).unwrap();
    assert_eq!(recovered.records.len(), 3);
    drop(gate);
}

#[test]
fn test_stop_is_bounded_when_commit_loop_stalls() {
    let store = Arc::new(LocalDataStore::in_memory());
    store.append(weight(140.0)).unwrap();

    let (transport, gate) = StalledTransport::new();
    let protocol = Protocol::builder(
        ProtocolSettings {
            shutdown_timeout: Duration::from_millis(200),
            ..fast_settings()
        },
        store.clone(),
    )
    .remote(ObjectStoreRemote::with_device_id(
        transport,
        "study",
        "p1",
        "dev",
    ))
    .build()
    .unwrap();

    protocol.start().unwrap();
    // Let the commit loop pick the record up and block inside the remote.
    wait_for(|| store.checked_out_len() == 1);

    let started = Instant::now();
    protocol.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(store.checked_out_len() + store.pending_len(), 1);

    // Releasing the remote returns the record to the queue.
    drop(gate);
    wait_for(|| store.pending_len() == 1);
}

#[test]
fn test_restart_after_stop_resumes_collection() {
    let store = Arc::new(LocalDataStore::in_memory());
    let protocol = Protocol::builder(idle_settings(), store.clone())
        .probe(PollingProbe::new(
            Scale {
                capability: Capability::new("bluetooth scale", true),
            },
            Duration::from_millis(10),
        ))
        .build()
        .unwrap();

    protocol.start().unwrap();
    wait_for(|| store.pending_len() >= 2);
    protocol.stop();
    let first_session = store.pending_len();

    protocol.start().unwrap();
    wait_for(|| store.pending_len() >= first_session + 2);
    protocol.stop();
}
