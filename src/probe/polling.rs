//! Polling probes: one cooperative timer thread per probe.

use crate::datum::{FieldValue, Reading};
use crate::probe::source::PollSource;
use crate::probe::state::{DatumSink, Probe, ProbeError, ProbeKind, ProbeShared, ProbeState};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// A probe that reads its source every `interval`.
pub struct PollingProbe<S: PollSource> {
    source: Arc<Mutex<S>>,
    interval: Duration,
    drop_unchanged: bool,
    shared: Arc<ProbeShared>,
    // Also serializes start/stop transitions.
    worker: Mutex<Option<Worker>>,
}

impl<S: PollSource> PollingProbe<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            interval,
            drop_unchanged: false,
            shared: ProbeShared::new(),
            worker: Mutex::new(None),
        }
    }

    /// Silently drop readings whose fields equal the previous reading's.
    pub fn drop_unchanged(mut self, enabled: bool) -> Self {
        self.drop_unchanged = enabled;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_source<S>(source: &Mutex<S>) -> MutexGuard<'_, S> {
    source.lock().unwrap_or_else(PoisonError::into_inner)
}

fn poll_loop<S: PollSource>(
    source: Arc<Mutex<S>>,
    interval: Duration,
    drop_unchanged: bool,
    shared: Arc<ProbeShared>,
    sink: Arc<dyn DatumSink>,
    stop_rx: Receiver<()>,
) {
    let ticker = tick(interval);
    let mut previous: Option<Vec<(&'static str, FieldValue)>> = None;

    loop {
        let fired = select! {
            recv(stop_rx) -> _ => false,
            recv(ticker) -> _ => true,
        };
        if !fired {
            break;
        }

        let reading = lock_source(&source).read();

        // The probe may have been stopped while the read was in flight.
        if !shared.is_running() {
            break;
        }

        let Some(reading) = reading else {
            continue;
        };

        if drop_unchanged {
            let fields = reading.fields();
            if previous.as_ref() == Some(&fields) {
                continue;
            }
            previous = Some(fields);
        }

        shared.touch(reading.timestamp());
        sink.store(reading.into_datum());
    }

    debug!(probe = S::Reading::PROBE_TYPE, "Poll loop exited");
}

impl<S: PollSource> Probe for PollingProbe<S> {
    fn probe_type(&self) -> &'static str {
        S::Reading::PROBE_TYPE
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Poll {
            interval_ms: self.interval.as_millis() as u64,
        }
    }

    fn state(&self) -> ProbeState {
        self.shared.state()
    }

    fn last_reading_at(&self) -> Option<DateTime<Utc>> {
        self.shared.last_reading()
    }

    fn start(&self, sink: Arc<dyn DatumSink>) -> Result<(), ProbeError> {
        let mut worker = self.worker();
        if worker.is_some() {
            return Ok(());
        }

        self.shared.set_state(ProbeState::Starting);

        if let Err(e) = lock_source(&self.source).check_available() {
            self.shared.set_state(ProbeState::Failed);
            warn!(probe = self.probe_type(), error = %e, "Failed to start probe");
            return Err(e);
        }

        let (stop_tx, stop_rx) = bounded(0);
        let source = self.source.clone();
        let shared = self.shared.clone();
        let interval = self.interval;
        let drop_unchanged = self.drop_unchanged;

        self.shared.set_state(ProbeState::Running);
        let spawned = thread::Builder::new()
            .name(format!("probe-{}", self.probe_type()))
            .spawn(move || poll_loop(source, interval, drop_unchanged, shared, sink, stop_rx));

        match spawned {
            Ok(handle) => {
                *worker = Some(Worker { stop_tx, handle });
                info!(
                    probe = self.probe_type(),
                    interval_ms = interval.as_millis() as u64,
                    "Started polling probe"
                );
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ProbeState::Failed);
                Err(ProbeError::Source(format!("could not spawn poll thread: {e}")))
            }
        }
    }

    fn stop(&self) {
        let mut worker = self.worker();
        match worker.take() {
            Some(Worker { stop_tx, handle }) => {
                self.shared.set_state(ProbeState::Stopping);
                drop(stop_tx);
                if handle.join().is_err() {
                    warn!(probe = self.probe_type(), "Poll thread panicked");
                }
                self.shared.set_state(ProbeState::Stopped);
                info!(probe = self.probe_type(), "Stopped polling probe");
            }
            None => {
                if self.shared.state() == ProbeState::Failed {
                    self.shared.set_state(ProbeState::Stopped);
                }
            }
        }
    }
}

impl<S: PollSource> Drop for PollingProbe<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
