//! The protocol: owns probes and data stores and runs the commit and
//! health cycles.
//!
//! ```text
//!  probe threads ──store()──▶ ProtocolSink ──anonymize──▶ LocalDataStore
//!                                                           │ drain
//!  commit thread ────────────────────────────────────────────┤
//!                         commit_data (no store lock held)   ▼
//!                                                     RemoteDataStore
//!  health thread: restart failed probes / remote, publish reports,
//!                 halt on fatal storage errors
//! ```

use crate::anonymization::RuleSet;
use crate::config::{BackoffConfig, Config};
use crate::datum::Datum;
use crate::probe::{DatumSink, Probe, ProbeState};
use crate::protocol::commit::CommitTracker;
use crate::protocol::events::{EventBus, FailureSummary, ProtocolEvent, Subsystem};
use crate::protocol::report::{LatencyWindow, ProbeReport, ProtocolReport};
use crate::remote::{RemoteDataStore, RemoteError};
use crate::store::LocalDataStore;
use crate::transparency::{create_shared_log, SharedTransparencyLog};
use chrono::Utc;
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const LATENCY_WINDOW: usize = 32;

/// Protocol-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    Stopped,
    Running,
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolState::Stopped => write!(f, "stopped"),
            ProtocolState::Running => write!(f, "running"),
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Two probes of the same type were added
    DuplicateProbe(String),
    /// A worker thread could not be spawned
    Spawn(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::DuplicateProbe(kind) => {
                write!(f, "Protocol already has a {kind} probe")
            }
            ProtocolError::Spawn(e) => write!(f, "Failed to spawn protocol thread: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Timing and batching parameters for a protocol.
#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    pub id: String,
    pub name: String,
    pub commit_interval: Duration,
    pub health_check_interval: Duration,
    pub shutdown_timeout: Duration,
    pub max_batch_size: usize,
    pub backoff: BackoffConfig,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "default".to_string(),
            commit_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
            max_batch_size: 500,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ProtocolSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            id: config.protocol_id.to_string(),
            name: config.protocol_name.clone(),
            commit_interval: config.commit_interval,
            health_check_interval: config.health_check_interval,
            shutdown_timeout: config.shutdown_timeout,
            max_batch_size: config.max_batch_size,
            backoff: config.backoff.clone(),
        }
    }
}

/// Result of draining everything the remote sink would take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushSummary {
    pub committed: usize,
    pub remaining: usize,
}

/// What one commit cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    NoRemote,
    RemoteDown,
    BackingOff,
    Empty,
    Committed { attempted: usize, committed: usize },
    StoreFailed,
}

/// Entry point for probe data: anonymize once, then append.
struct ProtocolSink {
    store: Arc<LocalDataStore>,
    rules: Arc<RuleSet>,
    transparency: SharedTransparencyLog,
    fatal_tx: Sender<FailureSummary>,
    failed: AtomicBool,
}

impl DatumSink for ProtocolSink {
    fn store(&self, datum: Datum) {
        let governed = self.rules.governed_fields(&datum) as u64;
        let datum = self.rules.anonymize(datum);
        let probe_type = datum.probe_type().to_string();

        match self.store.append(datum) {
            Ok(()) => self.transparency.record_stored(&probe_type, governed),
            Err(e) => {
                if !self.failed.swap(true, Ordering::SeqCst) {
                    error!(probe = %probe_type, error = %e, "Local data store rejected datum");
                    let _ = self
                        .fatal_tx
                        .send(FailureSummary::new(Subsystem::LocalStore, e.to_string()));
                }
            }
        }
    }
}

struct Shared {
    settings: ProtocolSettings,
    probes: Vec<Arc<dyn Probe>>,
    store: Arc<LocalDataStore>,
    remote: Option<Arc<dyn RemoteDataStore>>,
    rules: Arc<RuleSet>,
    sink: Arc<ProtocolSink>,
    events: EventBus,
    transparency: SharedTransparencyLog,
    running: AtomicBool,
    // Dropping the sender stops both loops.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    fatal_tx: Sender<FailureSummary>,
    fatal_rx: Receiver<FailureSummary>,
    // Held for a whole cycle so drains never interleave.
    tracker: Mutex<CommitTracker>,
    latency: Mutex<LatencyWindow>,
}

struct Loops {
    commit: JoinHandle<()>,
    health: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn sink(&self) -> Arc<dyn DatumSink> {
        self.sink.clone()
    }

    fn remote_subsystem(&self, remote: &dyn RemoteDataStore) -> Subsystem {
        Subsystem::RemoteSink(remote.name().to_string())
    }

    fn start_probe(&self, probe: &Arc<dyn Probe>) {
        match probe.start(self.sink()) {
            Ok(()) => self.events.publish(ProtocolEvent::ProbeStateChanged {
                probe_type: probe.probe_type().to_string(),
                state: probe.state(),
                failure: None,
            }),
            Err(e) => self.events.publish(ProtocolEvent::ProbeStateChanged {
                probe_type: probe.probe_type().to_string(),
                state: probe.state(),
                failure: Some(FailureSummary::new(
                    Subsystem::Probe(probe.probe_type().to_string()),
                    e.to_string(),
                )),
            }),
        }
    }

    fn start_remote(&self, remote: &Arc<dyn RemoteDataStore>) -> Result<(), RemoteError> {
        match remote.start() {
            Ok(()) => {
                lock(&self.tracker).reset_backoff();
                self.events.publish(ProtocolEvent::RemoteStateChanged {
                    running: true,
                    failure: None,
                });
                Ok(())
            }
            Err(e) => {
                warn!(remote = remote.name(), error = %e, "Remote data store unavailable; buffering locally");
                self.events.publish(ProtocolEvent::RemoteStateChanged {
                    running: false,
                    failure: Some(FailureSummary::new(
                        self.remote_subsystem(remote.as_ref()),
                        e.to_string(),
                    )),
                });
                Err(e)
            }
        }
    }

    fn stop_probes(&self) {
        for probe in &self.probes {
            let before = probe.state();
            probe.stop();
            if before != ProbeState::Stopped {
                self.events.publish(ProtocolEvent::ProbeStateChanged {
                    probe_type: probe.probe_type().to_string(),
                    state: probe.state(),
                    failure: None,
                });
            }
        }
    }

    /// Drain one batch, commit it outside the store lock, then ack and requeue.
    fn commit_cycle(&self, honor_backoff: bool) -> CycleOutcome {
        let Some(remote) = self.remote.as_ref() else {
            return CycleOutcome::NoRemote;
        };
        if !remote.is_running() {
            debug!(pending = self.store.pending_len(), "Remote not running; skipping commit");
            return CycleOutcome::RemoteDown;
        }

        let mut tracker = lock(&self.tracker);
        if honor_backoff && tracker.should_skip() {
            debug!(
                remaining = tracker.skip_remaining(),
                "Backing off after failed commit cycles"
            );
            return CycleOutcome::BackingOff;
        }

        let batch = self.store.drain(self.settings.max_batch_size);
        if batch.is_empty() {
            return CycleOutcome::Empty;
        }
        let attempted = batch.ids();

        let (committed_ids, elapsed, failure) = match remote.commit_data(batch.records()) {
            Ok(outcome) => {
                let failure = outcome.last_error.clone();
                (outcome.committed, Some(outcome.elapsed), failure)
            }
            Err(e) => (Vec::new(), None, Some(e.to_string())),
        };

        let committed: HashSet<&Uuid> = committed_ids.iter().collect();
        let acked_ids: Vec<Uuid> = attempted
            .iter()
            .filter(|id| committed.contains(id))
            .copied()
            .collect();

        let requeued = match self.store.settle(batch, &acked_ids) {
            Ok(settled) => settled.requeued,
            Err(e) => {
                error!(error = %e, "Failed to delete committed records from local data store");
                let _ = self
                    .fatal_tx
                    .send(FailureSummary::new(Subsystem::LocalStore, e.to_string()));
                return CycleOutcome::StoreFailed;
            }
        };

        for (id, attempts) in tracker.record_cycle(&attempted, &acked_ids) {
            warn!(
                id = %id,
                attempts,
                "Record keeps failing to commit and may be permanently invalid; keeping it pending"
            );
            self.events
                .publish(ProtocolEvent::SuspectRecord { id, attempts });
        }
        drop(tracker);

        if let Some(elapsed) = elapsed {
            lock(&self.latency).record(elapsed);
        }
        self.transparency
            .record_commit(acked_ids.len() as u64, requeued as u64);

        info!(
            committed = acked_ids.len(),
            total = attempted.len(),
            secs = elapsed.map(|d| d.as_secs_f64()).unwrap_or(0.0),
            "Committed {} of {} records",
            acked_ids.len(),
            attempted.len()
        );

        match failure {
            Some(message) if requeued > 0 => {
                self.events.publish(ProtocolEvent::CommitFailed {
                    committed: acked_ids.len(),
                    requeued,
                    failure: FailureSummary::new(self.remote_subsystem(remote.as_ref()), message),
                });
            }
            _ => self.events.publish(ProtocolEvent::CommitSucceeded {
                committed: acked_ids.len(),
            }),
        }

        CycleOutcome::Committed {
            attempted: attempted.len(),
            committed: acked_ids.len(),
        }
    }

    /// Commit batches until the store is empty or a batch is not fully acknowledged.
    fn commit_pending(&self) -> FlushSummary {
        let mut summary = FlushSummary::default();
        loop {
            match self.commit_cycle(false) {
                CycleOutcome::Committed {
                    attempted,
                    committed,
                } => {
                    summary.committed += committed;
                    if committed < attempted {
                        break;
                    }
                }
                _ => break,
            }
        }
        summary.remaining = self.store.pending_len() + self.store.checked_out_len();
        summary
    }

    fn health_check(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        for probe in &self.probes {
            if probe.state() == ProbeState::Failed {
                debug!(probe = probe.probe_type(), "Retrying failed probe");
                if probe.start(self.sink()).is_ok() {
                    info!(probe = probe.probe_type(), "Probe recovered");
                    self.events.publish(ProtocolEvent::ProbeStateChanged {
                        probe_type: probe.probe_type().to_string(),
                        state: probe.state(),
                        failure: None,
                    });
                }
            }
        }

        if let Some(remote) = self.remote.as_ref() {
            if !remote.is_running() && self.start_remote(remote).is_ok() {
                info!(remote = remote.name(), "Remote data store recovered");
            }
        }

        let report = self.report();
        debug!(
            pending = report.pending,
            checked_out = report.checked_out,
            "Generated protocol report"
        );
        self.events.publish(ProtocolEvent::ReportGenerated(report));
    }

    /// Stop everything after an unrecoverable storage error.
    fn halt(&self, failure: FailureSummary) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        error!(failure = %failure, "Protocol halted");

        drop(lock(&self.shutdown_tx).take());
        self.stop_probes();
        if let Some(remote) = self.remote.as_ref() {
            remote.stop();
        }
        self.events.publish(ProtocolEvent::Fatal(failure));
        if let Err(e) = self.transparency.save() {
            warn!(error = %e, "Failed to save transparency log");
        }
    }

    fn report(&self) -> ProtocolReport {
        ProtocolReport {
            protocol_id: self.settings.id.clone(),
            protocol_name: self.settings.name.clone(),
            generated_at: Utc::now(),
            probes: self
                .probes
                .iter()
                .map(|probe| ProbeReport {
                    probe_type: probe.probe_type().to_string(),
                    kind: probe.kind(),
                    state: probe.state(),
                    last_reading_at: probe.last_reading_at(),
                    data_stored: self.transparency.stored_for(probe.probe_type()),
                })
                .collect(),
            remote_running: self.remote.as_ref().map(|r| r.is_running()),
            pending: self.store.pending_len(),
            checked_out: self.store.checked_out_len(),
            commit_latency: lock(&self.latency).summary(),
        }
    }
}

fn commit_loop(shared: Arc<Shared>, shutdown_rx: Receiver<()>) {
    let ticker = tick(shared.settings.commit_interval);
    loop {
        let fired = select! {
            recv(shutdown_rx) -> _ => false,
            recv(ticker) -> _ => true,
        };
        if !fired {
            break;
        }
        shared.commit_cycle(true);
    }
    debug!("Commit loop exited");
}

enum HealthWake {
    Shutdown,
    Fatal(FailureSummary),
    Tick,
}

fn health_loop(shared: Arc<Shared>, shutdown_rx: Receiver<()>) {
    let ticker = tick(shared.settings.health_check_interval);
    let fatal_rx = shared.fatal_rx.clone();
    loop {
        let wake = select! {
            recv(shutdown_rx) -> _ => HealthWake::Shutdown,
            recv(fatal_rx) -> msg => msg.map(HealthWake::Fatal).unwrap_or(HealthWake::Shutdown),
            recv(ticker) -> _ => HealthWake::Tick,
        };
        match wake {
            HealthWake::Shutdown => break,
            HealthWake::Fatal(failure) => {
                shared.halt(failure);
                break;
            }
            HealthWake::Tick => shared.health_check(),
        }
    }
    debug!("Health loop exited");
}

/// Builder for [`Protocol`]. Probes and stores are injected here.
pub struct ProtocolBuilder {
    settings: ProtocolSettings,
    store: Arc<LocalDataStore>,
    rules: Option<RuleSet>,
    probes: Vec<Arc<dyn Probe>>,
    remote: Option<Arc<dyn RemoteDataStore>>,
    transparency: Option<SharedTransparencyLog>,
}

impl ProtocolBuilder {
    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn probe(self, probe: impl Probe + 'static) -> Self {
        self.shared_probe(Arc::new(probe))
    }

    pub fn shared_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn remote(self, remote: impl RemoteDataStore + 'static) -> Self {
        self.shared_remote(Arc::new(remote))
    }

    pub fn shared_remote(mut self, remote: Arc<dyn RemoteDataStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn transparency(mut self, log: SharedTransparencyLog) -> Self {
        self.transparency = Some(log);
        self
    }

    pub fn build(self) -> Result<Protocol, ProtocolError> {
        let mut seen = HashSet::new();
        for probe in &self.probes {
            if !seen.insert(probe.probe_type()) {
                return Err(ProtocolError::DuplicateProbe(probe.probe_type().to_string()));
            }
        }

        let rules = Arc::new(
            self.rules
                .unwrap_or_else(|| RuleSet::for_catalog(&self.settings.id)),
        );
        let transparency = self.transparency.unwrap_or_else(create_shared_log);
        let (fatal_tx, fatal_rx) = unbounded();
        let sink = Arc::new(ProtocolSink {
            store: self.store.clone(),
            rules: rules.clone(),
            transparency: transparency.clone(),
            fatal_tx: fatal_tx.clone(),
            failed: AtomicBool::new(false),
        });
        let tracker = CommitTracker::new(self.settings.backoff.clone());

        Ok(Protocol {
            shared: Arc::new(Shared {
                settings: self.settings,
                probes: self.probes,
                store: self.store,
                remote: self.remote,
                rules,
                sink,
                events: EventBus::default(),
                transparency,
                running: AtomicBool::new(false),
                shutdown_tx: Mutex::new(None),
                fatal_tx,
                fatal_rx,
                tracker: Mutex::new(tracker),
                latency: Mutex::new(LatencyWindow::new(LATENCY_WINDOW)),
            }),
            loops: Mutex::new(None),
        })
    }
}

/// Orchestrates a set of probes, one local data store and an optional
/// remote data store.
pub struct Protocol {
    shared: Arc<Shared>,
    loops: Mutex<Option<Loops>>,
}

impl Protocol {
    pub fn builder(settings: ProtocolSettings, store: Arc<LocalDataStore>) -> ProtocolBuilder {
        ProtocolBuilder {
            settings,
            store,
            rules: None,
            probes: Vec::new(),
            remote: None,
            transparency: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.settings.id
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.shared.settings
    }

    pub fn state(&self) -> ProtocolState {
        if self.shared.running.load(Ordering::SeqCst) {
            ProtocolState::Running
        } else {
            ProtocolState::Stopped
        }
    }

    pub fn probes(&self) -> &[Arc<dyn Probe>] {
        &self.shared.probes
    }

    pub fn store(&self) -> &Arc<LocalDataStore> {
        &self.shared.store
    }

    pub fn rules(&self) -> &RuleSet {
        &self.shared.rules
    }

    pub fn transparency(&self) -> &SharedTransparencyLog {
        &self.shared.transparency
    }

    /// Receive notifications from now on.
    pub fn subscribe(&self) -> Receiver<ProtocolEvent> {
        self.shared.events.subscribe()
    }

    pub fn report(&self) -> ProtocolReport {
        self.shared.report()
    }

    /// Start probes and the remote sink, then the commit and health loops.
    ///
    /// Probe and remote failures are reported as events and retried by the
    /// health cycle; they do not fail the start. Starting a running
    /// protocol is a no-op.
    pub fn start(&self) -> Result<(), ProtocolError> {
        let mut loops = lock(&self.loops);
        if self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        // A halted protocol leaves finished loop threads behind.
        if let Some(old) = loops.take() {
            join_loops(old);
        }

        info!(
            protocol = %self.shared.settings.name,
            id = %self.shared.settings.id,
            probes = self.shared.probes.len(),
            "Starting protocol"
        );
        while self.shared.fatal_rx.try_recv().is_ok() {}
        self.shared.sink.failed.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        for probe in &self.shared.probes {
            self.shared.start_probe(probe);
        }
        if let Some(remote) = self.shared.remote.as_ref() {
            let _ = self.shared.start_remote(remote);
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let commit = {
            let shared = self.shared.clone();
            let rx = shutdown_rx.clone();
            thread::Builder::new()
                .name("protocol-commit".into())
                .spawn(move || commit_loop(shared, rx))
        };
        let commit = match commit {
            Ok(handle) => handle,
            Err(e) => {
                self.abort_start();
                return Err(ProtocolError::Spawn(e.to_string()));
            }
        };

        let health = {
            let shared = self.shared.clone();
            thread::Builder::new()
                .name("protocol-health".into())
                .spawn(move || health_loop(shared, shutdown_rx))
        };
        let health = match health {
            Ok(handle) => handle,
            Err(e) => {
                drop(shutdown_tx);
                let _ = commit.join();
                self.abort_start();
                return Err(ProtocolError::Spawn(e.to_string()));
            }
        };

        *lock(&self.shared.shutdown_tx) = Some(shutdown_tx);
        *loops = Some(Loops { commit, health });
        Ok(())
    }

    fn abort_start(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.stop_probes();
        if let Some(remote) = self.shared.remote.as_ref() {
            remote.stop();
        }
    }

    /// Stop probes, make one time-bounded final commit, then stop the remote.
    ///
    /// Records the final commit could not deliver stay pending for the next
    /// session. Idempotent.
    pub fn stop(&self) {
        let mut loops = lock(&self.loops);
        let Some(handles) = loops.take() else {
            return;
        };

        let deadline = Instant::now() + self.shared.settings.shutdown_timeout;
        drop(lock(&self.shared.shutdown_tx).take());
        let loops_exited = join_loops_until(handles, deadline);

        // Halted protocols have already released everything.
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shared.stop_probes();
        if loops_exited {
            self.final_commit(deadline);
        } else {
            warn!("Commit cycle still in flight at shutdown; undelivered data stays pending");
        }
        if let Some(remote) = self.shared.remote.as_ref() {
            remote.stop();
        }

        if let Err(e) = self.shared.transparency.save() {
            warn!(error = %e, "Failed to save transparency log");
        }
        self.shared.events.publish(ProtocolEvent::Stopped);
        info!(
            pending = self.shared.store.pending_len(),
            "Protocol stopped"
        );
    }

    fn final_commit(&self, deadline: Instant) {
        let Some(remote) = self.shared.remote.as_ref() else {
            return;
        };
        if !remote.is_running() {
            info!(
                pending = self.shared.store.pending_len(),
                "Remote not running; pending data kept for next session"
            );
            return;
        }

        let (done_tx, done_rx) = bounded(1);
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("protocol-final-commit".into())
            .spawn(move || {
                let _ = done_tx.send(shared.commit_pending());
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Could not run final commit");
            return;
        }

        match done_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(summary) => info!(
                committed = summary.committed,
                remaining = summary.remaining,
                "Final commit finished"
            ),
            Err(_) => warn!(
                timeout_ms = self.shared.settings.shutdown_timeout.as_millis() as u64,
                "Final commit timed out; undelivered data stays pending"
            ),
        }
    }

    /// Start the remote sink if needed and commit everything pending.
    ///
    /// Does not require the protocol to be running.
    pub fn flush(&self) -> Result<FlushSummary, RemoteError> {
        let Some(remote) = self.shared.remote.as_ref() else {
            return Err(RemoteError::Setup(
                "no remote data store configured".to_string(),
            ));
        };
        if !remote.is_running() {
            self.shared.start_remote(remote)?;
        }
        Ok(self.shared.commit_pending())
    }

    /// Run one commit cycle now, honoring backoff.
    pub fn commit_now(&self) {
        self.shared.commit_cycle(true);
    }

    /// Run one health cycle now.
    pub fn health_check_now(&self) {
        self.shared.health_check();
    }

    /// Discard all pending records by explicit policy.
    pub fn clear_pending(&self) -> Result<usize, crate::store::StoreError> {
        let cleared = self.shared.store.clear()?;
        lock(&self.shared.tracker).forget_all();
        Ok(cleared)
    }
}

fn join_loops(loops: Loops) {
    if loops.commit.join().is_err() {
        warn!("Commit loop panicked");
    }
    if loops.health.join().is_err() {
        warn!("Health loop panicked");
    }
}

/// Join the loop threads, giving up at `deadline`. Returns whether both exited.
fn join_loops_until(loops: Loops, deadline: Instant) -> bool {
    let (done_tx, done_rx) = bounded(1);
    let spawned = thread::Builder::new()
        .name("protocol-join".into())
        .spawn(move || {
            join_loops(loops);
            let _ = done_tx.send(());
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Could not wait for protocol loops");
        return false;
    }
    done_rx
        .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        .is_ok()
}

impl Drop for Protocol {
    fn drop(&mut self) {
        self.stop();
    }
}
