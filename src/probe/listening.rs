//! Listening probes: readings arrive on the source's own threads.

use crate::datum::Reading;
use crate::probe::source::{ListenSource, ReadingHandler, SubscriptionHandle};
use crate::probe::state::{DatumSink, Probe, ProbeError, ProbeKind, ProbeShared, ProbeState};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// A probe that registers a handler with a [`ListenSource`].
///
/// Each start registers a fresh handler tagged with a generation number.
/// Events reaching a handler whose generation is no longer active are
/// ignored, so nothing is stored after `stop` returns.
pub struct ListeningProbe<S: ListenSource> {
    source: Arc<S>,
    shared: Arc<ProbeShared>,
    active_generation: Arc<AtomicU64>,
    next_generation: AtomicU64,
    // Also serializes start/stop transitions.
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl<S: ListenSource> ListeningProbe<S> {
    pub fn new(source: S) -> Self {
        Self::from_shared(Arc::new(source))
    }

    /// Build around a source that is also referenced elsewhere.
    pub fn from_shared(source: Arc<S>) -> Self {
        Self {
            source,
            shared: ProbeShared::new(),
            active_generation: Arc::new(AtomicU64::new(0)),
            next_generation: AtomicU64::new(1),
            subscription: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn subscription(&self) -> MutexGuard<'_, Option<SubscriptionHandle>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: ListenSource> Probe for ListeningProbe<S> {
    fn probe_type(&self) -> &'static str {
        S::Reading::PROBE_TYPE
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Listen
    }

    fn state(&self) -> ProbeState {
        self.shared.state()
    }

    fn last_reading_at(&self) -> Option<DateTime<Utc>> {
        self.shared.last_reading()
    }

    fn start(&self, sink: Arc<dyn DatumSink>) -> Result<(), ProbeError> {
        let mut subscription = self.subscription();
        if subscription.is_some() {
            return Ok(());
        }

        self.shared.set_state(ProbeState::Starting);

        if let Err(e) = self.source.check_available() {
            self.shared.set_state(ProbeState::Failed);
            warn!(probe = self.probe_type(), error = %e, "Failed to start probe");
            return Err(e);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let active = self.active_generation.clone();
        let shared = self.shared.clone();
        let handler: ReadingHandler<S::Reading> = Arc::new(move |reading: S::Reading| {
            if active.load(Ordering::SeqCst) != generation || !shared.is_running() {
                debug!(
                    probe = S::Reading::PROBE_TYPE,
                    "Ignoring event delivered to inactive handler"
                );
                return;
            }
            shared.touch(reading.timestamp());
            sink.store(reading.into_datum());
        });

        self.active_generation.store(generation, Ordering::SeqCst);
        self.shared.set_state(ProbeState::Running);

        match self.source.subscribe(handler) {
            Ok(handle) => {
                *subscription = Some(handle);
                info!(probe = self.probe_type(), "Started listening probe");
                Ok(())
            }
            Err(e) => {
                self.active_generation.store(0, Ordering::SeqCst);
                self.shared.set_state(ProbeState::Failed);
                warn!(probe = self.probe_type(), error = %e, "Failed to subscribe to sensor source");
                Err(e)
            }
        }
    }

    fn stop(&self) {
        let mut subscription = self.subscription();
        match subscription.take() {
            Some(handle) => {
                self.shared.set_state(ProbeState::Stopping);
                self.active_generation.store(0, Ordering::SeqCst);
                self.source.unsubscribe(handle);
                self.shared.set_state(ProbeState::Stopped);
                info!(probe = self.probe_type(), "Stopped listening probe");
            }
            None => {
                if self.shared.state() == ProbeState::Failed {
                    self.shared.set_state(ProbeState::Stopped);
                }
            }
        }
    }
}

impl<S: ListenSource> Drop for ListeningProbe<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::{CompassReading, Datum};
    use crate::probe::source::Capability;
    use std::collections::HashMap;

    #[derive(Default)]
    struct CollectingSink {
        data: Mutex<Vec<Datum>>,
    }

    impl DatumSink for CollectingSink {
        fn store(&self, datum: Datum) {
            self.data.lock().unwrap().push(datum);
        }
    }

    /// Source whose events are pushed by the test. Keeps handlers after
    /// unsubscribe so late deliveries can be simulated.
    struct ManualCompass {
        capability: Capability,
        handlers: Mutex<HashMap<u64, ReadingHandler<CompassReading>>>,
        retired: Mutex<Vec<ReadingHandler<CompassReading>>>,
        next_id: AtomicU64,
    }

    impl ManualCompass {
        fn new(enabled: bool) -> Self {
            Self {
                capability: Capability::new("heading", enabled),
                handlers: Mutex::new(HashMap::new()),
                retired: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }
        }

        fn emit(&self, heading: f64) {
            let handlers: Vec<_> = self.handlers.lock().unwrap().values().cloned().collect();
            for h in handlers {
                h(CompassReading {
                    timestamp: Utc::now(),
                    heading,
                });
            }
        }

        fn emit_late(&self, heading: f64) {
            let retired: Vec<_> = self.retired.lock().unwrap().clone();
            for h in retired {
                h(CompassReading {
                    timestamp: Utc::now(),
                    heading,
                });
            }
        }
    }

    impl ListenSource for ManualCompass {
        type Reading = CompassReading;

        fn check_available(&self) -> Result<(), ProbeError> {
            self.capability.check()
        }

        fn subscribe(
            &self,
            handler: ReadingHandler<CompassReading>,
        ) -> Result<SubscriptionHandle, ProbeError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.handlers.lock().unwrap().insert(id, handler);
            Ok(SubscriptionHandle::new(id))
        }

        fn unsubscribe(&self, handle: SubscriptionHandle) {
            if let Some(h) = self.handlers.lock().unwrap().remove(&handle.id()) {
                self.retired.lock().unwrap().push(h);
            }
        }
    }

    #[test]
    fn test_events_become_datums() {
        let probe = ListeningProbe::new(ManualCompass::new(true));
        let sink = Arc::new(CollectingSink::default());

        probe.start(sink.clone()).unwrap();
        probe.source().emit(90.0);
        probe.source().emit(180.0);

        assert_eq!(sink.data.lock().unwrap().len(), 2);
        assert_eq!(probe.state(), ProbeState::Running);
        assert_eq!(probe.kind(), ProbeKind::Listen);
    }

    #[test]
    fn test_late_events_after_stop_are_ignored() {
        let probe = ListeningProbe::new(ManualCompass::new(true));
        let sink = Arc::new(CollectingSink::default());

        probe.start(sink.clone()).unwrap();
        probe.source().emit(10.0);
        probe.stop();
        probe.source().emit_late(20.0);

        assert_eq!(sink.data.lock().unwrap().len(), 1);
        assert_eq!(probe.state(), ProbeState::Stopped);
    }

    #[test]
    fn test_stale_handler_ignored_after_restart() {
        let probe = ListeningProbe::new(ManualCompass::new(true));
        let sink = Arc::new(CollectingSink::default());

        probe.start(sink.clone()).unwrap();
        probe.stop();
        probe.start(sink.clone()).unwrap();

        probe.source().emit_late(1.0);
        probe.source().emit(2.0);

        let data = sink.data.lock().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].field("heading").and_then(|v| v.as_f64()), Some(2.0));
    }

    #[test]
    fn test_start_while_running_keeps_single_subscription() {
        let probe = ListeningProbe::new(ManualCompass::new(true));
        let sink: Arc<dyn DatumSink> = Arc::new(CollectingSink::default());

        probe.start(sink.clone()).unwrap();
        probe.start(sink).unwrap();
        assert_eq!(probe.source().handlers.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsupported_then_enabled() {
        let probe = ListeningProbe::new(ManualCompass::new(false));
        let sink: Arc<dyn DatumSink> = Arc::new(CollectingSink::default());

        assert!(probe.start(sink.clone()).is_err());
        assert_eq!(probe.state(), ProbeState::Failed);

        probe.source().capability.set_enabled(true);
        probe.start(sink).unwrap();
        assert_eq!(probe.state(), ProbeState::Running);
    }
}
