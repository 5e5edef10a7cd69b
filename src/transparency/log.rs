//! Privacy-preserving transparency log.
//!
//! Counts what the relay stored and shipped without retaining any field
//! values. Counters are cumulative across sessions when persistence is on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Transparency statistics for the relay.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Datums appended to the local store
    stored: AtomicU64,
    /// Datums acknowledged by the remote sink
    committed: AtomicU64,
    /// Datums returned to the pending queue after a failed commit
    requeued: AtomicU64,
    /// Field values altered by anonymization
    fields_anonymized: AtomicU64,
    /// Commit cycles that attempted a batch
    commit_cycles: AtomicU64,
    stored_by_probe: Mutex<BTreeMap<String, u64>>,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    /// Create a new transparency log.
    pub fn new() -> Self {
        Self {
            stored: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            fields_anonymized: AtomicU64::new(0),
            commit_cycles: AtomicU64::new(0),
            stored_by_probe: Mutex::new(BTreeMap::new()),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            warn!(error = %e, "Could not load previous transparency stats");
        }

        log
    }

    fn stored_by_probe(&self) -> MutexGuard<'_, BTreeMap<String, u64>> {
        self.stored_by_probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a datum appended to the local store.
    pub fn record_stored(&self, probe_type: &str, fields_anonymized: u64) {
        self.stored.fetch_add(1, Ordering::Relaxed);
        self.fields_anonymized
            .fetch_add(fields_anonymized, Ordering::Relaxed);
        *self
            .stored_by_probe()
            .entry(probe_type.to_string())
            .or_insert(0) += 1;
    }

    /// Record the outcome of one commit cycle.
    pub fn record_commit(&self, committed: u64, requeued: u64) {
        self.commit_cycles.fetch_add(1, Ordering::Relaxed);
        self.committed.fetch_add(committed, Ordering::Relaxed);
        self.requeued.fetch_add(requeued, Ordering::Relaxed);
    }

    /// Data stored so far by one probe type.
    pub fn stored_for(&self, probe_type: &str) -> u64 {
        self.stored_by_probe()
            .get(probe_type)
            .copied()
            .unwrap_or(0)
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            stored: self.stored.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            fields_anonymized: self.fields_anonymized.load(Ordering::Relaxed),
            commit_cycles: self.commit_cycles.load(Ordering::Relaxed),
            stored_by_probe: self.stored_by_probe().clone(),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        let per_probe = if stats.stored_by_probe.is_empty() {
            "   (none)".to_string()
        } else {
            stats
                .stored_by_probe
                .iter()
                .map(|(probe, n)| format!("   {probe}: {n}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "Session Statistics:\n\
             - Data stored: {}\n\
             {}\n\
             - Data committed to remote: {}\n\
             - Data requeued for retry: {}\n\
             - Field values anonymized: {}\n\
             - Commit cycles: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - Anonymization runs once, before data is stored\n\
             - Stored and uploaded records are identical\n\
             - This log keeps counts only, never values",
            stats.stored,
            per_probe,
            stats.committed,
            stats.requeued,
            stats.fields_anonymized,
            stats.commit_cycles,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                stored: stats.stored,
                committed: stats.committed,
                requeued: stats.requeued,
                fields_anonymized: stats.fields_anonymized,
                commit_cycles: stats.commit_cycles,
                stored_by_probe: stats.stored_by_probe,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.stored.store(persisted.stored, Ordering::Relaxed);
                self.committed.store(persisted.committed, Ordering::Relaxed);
                self.requeued.store(persisted.requeued, Ordering::Relaxed);
                self.fields_anonymized
                    .store(persisted.fields_anonymized, Ordering::Relaxed);
                self.commit_cycles
                    .store(persisted.commit_cycles, Ordering::Relaxed);
                *self.stored_by_probe() = persisted.stored_by_probe;
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.stored.store(0, Ordering::Relaxed);
        self.committed.store(0, Ordering::Relaxed);
        self.requeued.store(0, Ordering::Relaxed);
        self.fields_anonymized.store(0, Ordering::Relaxed);
        self.commit_cycles.store(0, Ordering::Relaxed);
        self.stored_by_probe().clear();
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub stored: u64,
    pub committed: u64,
    pub requeued: u64,
    pub fields_anonymized: u64,
    pub commit_cycles: u64,
    pub stored_by_probe: BTreeMap<String, u64>,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    stored: u64,
    committed: u64,
    requeued: u64,
    fields_anonymized: u64,
    commit_cycles: u64,
    #[serde(default)]
    stored_by_probe: BTreeMap<String, u64>,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
