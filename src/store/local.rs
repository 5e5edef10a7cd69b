//! The local data store: a durable, concurrently writable buffer between
//! probes and the remote sink.
//!
//! Records move through three states:
//!
//! ```text
//!  append ──▶ pending ──drain──▶ checked out ──ack──▶ deleted
//!                ▲                    │
//!                └─────requeue────────┘
//! ```
//!
//! All four operations take the same lock, so a drain never observes a torn
//! append and an ack never races a requeue of the same record. The lock is
//! held across medium writes but never across network I/O: callers drain,
//! release, commit, then come back to ack or requeue.

use crate::datum::Datum;
use crate::store::error::StoreError;
use crate::store::medium::{MemoryMedium, StorageMedium};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An ordered slice of records checked out of the store.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    records: Vec<Datum>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Datum] {
        &self.records
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.records.iter().map(Datum::id).collect()
    }

    pub fn into_records(self) -> Vec<Datum> {
        self.records
    }

    /// Split into (acknowledged, unacknowledged), preserving order.
    pub fn partition(self, acknowledged: &[Uuid]) -> (Vec<Datum>, Vec<Datum>) {
        let acked: HashSet<&Uuid> = acknowledged.iter().collect();
        self.records
            .into_iter()
            .partition(|datum| acked.contains(&datum.id()))
    }
}

/// What [`LocalDataStore::settle`] did with a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settled {
    pub acknowledged: usize,
    pub requeued: usize,
}

struct StoreState {
    medium: Box<dyn StorageMedium>,
    pending: VecDeque<Datum>,
    checked_out: HashMap<Uuid, Datum>,
}

/// Durable append buffer with drain/ack/requeue semantics.
pub struct LocalDataStore {
    state: Mutex<StoreState>,
}

impl LocalDataStore {
    /// Open a store over `medium`, recovering every persisted record as pending.
    ///
    /// Records that were checked out when the process stopped come back as
    /// pending too. Corrupt entries are skipped and logged.
    pub fn open(medium: impl StorageMedium + 'static) -> Result<Self, StoreError> {
        let mut medium: Box<dyn StorageMedium> = Box::new(medium);
        let recovered = medium.scan()?;

        for corrupt in &recovered.corrupt {
            warn!(line = corrupt.line, reason = %corrupt.reason, "Skipping corrupt stored record");
        }
        if !recovered.records.is_empty() || !recovered.corrupt.is_empty() {
            info!(
                pending = recovered.records.len(),
                corrupt = recovered.corrupt.len(),
                "Recovered local data store"
            );
        }

        Ok(Self {
            state: Mutex::new(StoreState {
                medium,
                pending: recovered.records.into(),
                checked_out: HashMap::new(),
            }),
        })
    }

    /// A store backed by a fresh in-memory medium.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(StoreState {
                medium: Box::new(MemoryMedium::new()),
                pending: VecDeque::new(),
                checked_out: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Durably append a record. Safe for concurrent callers.
    pub fn append(&self, datum: Datum) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.medium.append(&datum)?;
        debug!(probe = datum.probe_type(), id = %datum.id(), "Stored datum");
        state.pending.push_back(datum);
        Ok(())
    }

    /// Check out up to `max_batch_size` of the oldest pending records.
    pub fn drain(&self, max_batch_size: usize) -> Batch {
        let mut state = self.lock();
        let take = max_batch_size.min(state.pending.len());
        let records: Vec<Datum> = state.pending.drain(..take).collect();
        for datum in &records {
            state.checked_out.insert(datum.id(), datum.clone());
        }
        Batch { records }
    }

    /// Permanently delete acknowledged records.
    ///
    /// If the medium cannot record the deletion the records are put back at
    /// the head of the pending queue and the error is returned.
    pub fn ack(&self, ids: &[Uuid]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut state = self.lock();
        if let Err(e) = state.medium.delete(ids) {
            let mut restored: Vec<Datum> = ids
                .iter()
                .filter_map(|id| state.checked_out.remove(id))
                .collect();
            while let Some(datum) = restored.pop() {
                state.pending.push_front(datum);
            }
            return Err(e);
        }

        let mut removed = 0;
        for id in ids {
            if state.checked_out.remove(id).is_some() {
                removed += 1;
            } else if let Some(pos) = state.pending.iter().position(|d| d.id() == *id) {
                state.pending.remove(pos);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Return unacknowledged records to the head of the queue, in order.
    ///
    /// Records that are not currently checked out are ignored, so a record
    /// can never be queued twice.
    pub fn requeue(&self, records: Vec<Datum>) -> usize {
        let mut state = self.lock();
        let mut returning: Vec<Datum> = records
            .into_iter()
            .filter(|datum| state.checked_out.remove(&datum.id()).is_some())
            .collect();

        let count = returning.len();
        while let Some(datum) = returning.pop() {
            state.pending.push_front(datum);
        }
        count
    }

    /// Finish a batch: delete its acknowledged records and requeue the rest.
    ///
    /// Both happen under one lock. If the medium cannot record the deletion,
    /// the whole batch goes back to the head of the queue in its original
    /// order and the error is returned.
    pub fn settle(&self, batch: Batch, acknowledged: &[Uuid]) -> Result<Settled, StoreError> {
        let acked: HashSet<&Uuid> = acknowledged.iter().collect();
        let acked_ids: Vec<Uuid> = batch
            .records
            .iter()
            .map(Datum::id)
            .filter(|id| acked.contains(id))
            .collect();

        let mut state = self.lock();
        let deleted = if acked_ids.is_empty() {
            Ok(())
        } else {
            state.medium.delete(&acked_ids)
        };

        let mut settled = Settled::default();
        let mut returning = Vec::new();
        for datum in batch.records {
            if state.checked_out.remove(&datum.id()).is_none() {
                continue;
            }
            if deleted.is_ok() && acked.contains(&datum.id()) {
                settled.acknowledged += 1;
            } else {
                returning.push(datum);
            }
        }

        settled.requeued = returning.len();
        while let Some(datum) = returning.pop() {
            state.pending.push_front(datum);
        }
        deleted.map(|()| settled)
    }

    /// Discard all pending records. Checked-out records are left alone.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut state = self.lock();
        let ids: Vec<Uuid> = state.pending.iter().map(Datum::id).collect();
        state.medium.delete(&ids)?;
        state.pending.clear();
        if !ids.is_empty() {
            warn!(count = ids.len(), "Cleared pending records from local data store");
        }
        Ok(ids.len())
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn checked_out_len(&self) -> usize {
        self.lock().checked_out.len()
    }

    /// Snapshot of the pending queue, oldest first.
    pub fn peek_pending(&self, limit: usize) -> Vec<Datum> {
        self.lock().pending.iter().take(limit).cloned().collect()
    }
}

impl Default for LocalDataStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
