//! Remote data stores: network sinks that accept batches of stored records.

use crate::datum::Datum;
use crate::remote::transport::ObjectTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Remote sink errors.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// One-time setup could not complete; the remote path is disabled
    Setup(String),
    /// Whole-batch failure that the next commit cycle may recover from
    Transient(String),
    /// `commit_data` was called before a successful `start`
    NotReady,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Setup(msg) => write!(f, "Remote setup failed: {msg}"),
            RemoteError::Transient(msg) => write!(f, "Remote commit failed: {msg}"),
            RemoteError::NotReady => write!(f, "Remote data store is not started"),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Result of one `commit_data` call.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Ids the sink acknowledged, in batch order
    pub committed: Vec<Uuid>,
    /// Number of records that were not acknowledged
    pub failed: usize,
    /// Last per-record error message, if any
    pub last_error: Option<String>,
    pub elapsed: Duration,
}

impl CommitOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// A network sink for committed records.
pub trait RemoteDataStore: Send + Sync {
    /// Display name used in logs and failure summaries.
    fn name(&self) -> &str;

    /// One-time, idempotent setup. Safe to call again after a failure.
    fn start(&self) -> Result<(), RemoteError>;

    fn is_running(&self) -> bool;

    /// Transmit every record; return exactly the subset the sink acknowledged.
    ///
    /// Per-record failures are expected and reported through the outcome,
    /// not as an error.
    fn commit_data(&self, records: &[Datum]) -> Result<CommitOutcome, RemoteError>;

    fn stop(&self);
}

/// Device identifier used to partition remote containers.
pub fn default_device_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Remote data store writing one object per record into a container
/// `{bucket}/{protocol_id}/{device_id}`, keyed by record id.
pub struct ObjectStoreRemote<T: ObjectTransport> {
    transport: T,
    bucket: String,
    protocol_id: String,
    device_id: String,
    running: AtomicBool,
    setup: Mutex<()>,
}

impl<T: ObjectTransport> ObjectStoreRemote<T> {
    pub fn new(transport: T, bucket: impl Into<String>, protocol_id: impl Into<String>) -> Self {
        Self::with_device_id(transport, bucket, protocol_id, default_device_id())
    }

    pub fn with_device_id(
        transport: T,
        bucket: impl Into<String>,
        protocol_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            bucket: bucket.into(),
            protocol_id: protocol_id.into(),
            device_id: device_id.into(),
            running: AtomicBool::new(false),
            setup: Mutex::new(()),
        }
    }

    /// The container every object of this protocol and device lands in.
    pub fn container(&self) -> String {
        format!(
            "{}/{}/{}",
            self.bucket.trim_end_matches('/'),
            self.protocol_id,
            self.device_id
        )
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: ObjectTransport> RemoteDataStore for ObjectStoreRemote<T> {
    fn name(&self) -> &str {
        "object store"
    }

    fn start(&self) -> Result<(), RemoteError> {
        let _guard = self.setup.lock().unwrap_or_else(PoisonError::into_inner);
        let container = self.container();

        self.transport
            .ensure_container_exists(&container)
            .map_err(|e| RemoteError::Setup(e.to_string()))?;

        if !self.running.swap(true, Ordering::SeqCst) {
            info!(container = %container, "Remote data store started");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn commit_data(&self, records: &[Datum]) -> Result<CommitOutcome, RemoteError> {
        if !self.is_running() {
            return Err(RemoteError::NotReady);
        }

        let container = self.container();
        let start = Instant::now();
        let mut outcome = CommitOutcome::default();

        for datum in records {
            let result = datum
                .to_json_bytes()
                .map_err(|e| e.to_string())
                .and_then(|payload| {
                    self.transport
                        .put(&container, &datum.id().to_string(), &payload)
                        .map_err(|e| e.to_string())
                });

            match result {
                Ok(()) => outcome.committed.push(datum.id()),
                Err(e) => {
                    warn!(id = %datum.id(), error = %e, "Failed to put datum into remote container");
                    outcome.failed += 1;
                    outcome.last_error = Some(e);
                }
            }
        }

        outcome.elapsed = start.elapsed();
        debug!(
            committed = outcome.committed.len(),
            total = records.len(),
            secs = outcome.elapsed.as_secs_f64(),
            "Committed data items to remote container"
        );
        Ok(outcome)
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Remote data store stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::{CompassReading, Reading};
    use crate::remote::transport::TransportError;
    use chrono::Utc;
    use std::collections::HashSet;

    #[derive(Default)]
    struct RecordingTransport {
        containers: Mutex<HashSet<String>>,
        objects: Mutex<Vec<(String, String, Vec<u8>)>>,
        reject_keys: Mutex<HashSet<String>>,
    }

    impl ObjectTransport for RecordingTransport {
        fn ensure_container_exists(&self, container: &str) -> Result<(), TransportError> {
            self.containers.lock().unwrap().insert(container.to_string());
            Ok(())
        }

        fn put(&self, container: &str, key: &str, payload: &[u8]) -> Result<(), TransportError> {
            if self.reject_keys.lock().unwrap().contains(key) {
                return Err(TransportError::Server {
                    status: 503,
                    message: "slow down".to_string(),
                });
            }
            self.objects.lock().unwrap().push((
                container.to_string(),
                key.to_string(),
                payload.to_vec(),
            ));
            Ok(())
        }
    }

    fn compass(heading: f64) -> Datum {
        CompassReading {
            timestamp: Utc::now(),
            heading,
        }
        .into_datum()
    }

    #[test]
    fn test_container_layout() {
        let remote = ObjectStoreRemote::with_device_id(
            RecordingTransport::default(),
            "study-data/",
            "proto-1",
            "phone-7",
        );
        assert_eq!(remote.container(), "study-data/proto-1/phone-7");
    }

    #[test]
    fn test_commit_before_start_is_not_ready() {
        let remote = ObjectStoreRemote::new(RecordingTransport::default(), "b", "p");
        assert_eq!(remote.commit_data(&[]).unwrap_err(), RemoteError::NotReady);
    }

    #[test]
    fn test_partial_commit_returns_acknowledged_subset() {
        let remote =
            ObjectStoreRemote::with_device_id(RecordingTransport::default(), "b", "p", "d");
        remote.start().unwrap();

        let a = compass(1.0);
        let b = compass(2.0);
        remote
            .transport()
            .reject_keys
            .lock()
            .unwrap()
            .insert(b.id().to_string());

        let outcome = remote.commit_data(&[a.clone(), b]).unwrap();
        assert_eq!(outcome.committed, vec![a.id()]);
        assert_eq!(outcome.failed, 1);
        assert!(outcome.last_error.unwrap().contains("503"));

        let objects = remote.transport().objects.lock().unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].0, "b/p/d");
        assert_eq!(objects[0].1, a.id().to_string());
        assert_eq!(objects[0].2, a.to_json_bytes().unwrap());
    }

    #[test]
    fn test_start_is_idempotent() {
        let remote = ObjectStoreRemote::new(RecordingTransport::default(), "b", "p");
        remote.start().unwrap();
        remote.start().unwrap();
        assert!(remote.is_running());
        assert_eq!(remote.transport().containers.lock().unwrap().len(), 1);
        remote.stop();
        assert!(!remote.is_running());
    }
}
