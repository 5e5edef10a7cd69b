//! Simulated sensor sources.
//!
//! These let the relay run end to end on hosts without motion or location
//! hardware. Values are deterministic functions of a step counter.

use crate::datum::{AccelerometerReading, CompassReading, LocationReading};
use crate::probe::source::{Capability, ListenSource, PollSource, ReadingHandler, SubscriptionHandle};
use crate::probe::state::ProbeError;
use chrono::Utc;
use crossbeam_channel::{bounded, select, tick, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

/// Accelerometer producing slow sine waves on each axis.
#[derive(Debug, Default)]
pub struct SimulatedAccelerometer {
    step: u64,
}

impl SimulatedAccelerometer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PollSource for SimulatedAccelerometer {
    type Reading = AccelerometerReading;

    fn check_available(&mut self) -> Result<(), ProbeError> {
        Ok(())
    }

    fn read(&mut self) -> Option<AccelerometerReading> {
        self.step += 1;
        let t = self.step as f64 / 10.0;
        Some(AccelerometerReading {
            timestamp: Utc::now(),
            x: t.sin() * 0.3,
            y: t.cos() * 0.3,
            z: 9.81 + (t / 3.0).sin() * 0.05,
        })
    }
}

/// Location source that only moves on every third read.
///
/// Gated by a [`Capability`] standing in for the device's location
/// services switch.
#[derive(Debug)]
pub struct SimulatedLocation {
    capability: Capability,
    step: u64,
    origin: (f64, f64),
}

impl SimulatedLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            capability: Capability::new("location services", true),
            step: 0,
            origin: (latitude, longitude),
        }
    }

    /// Handle for toggling location services from outside the probe.
    pub fn capability(&self) -> Capability {
        self.capability.clone()
    }
}

impl PollSource for SimulatedLocation {
    type Reading = LocationReading;

    fn check_available(&mut self) -> Result<(), ProbeError> {
        self.capability.check()
    }

    fn read(&mut self) -> Option<LocationReading> {
        // No fix while services are off.
        if !self.capability.is_enabled() {
            return None;
        }
        self.step += 1;
        let moves = (self.step / 3) as f64;
        Some(LocationReading {
            timestamp: Utc::now(),
            accuracy: 15.0,
            latitude: self.origin.0 + moves * 0.0001,
            longitude: self.origin.1 - moves * 0.0001,
        })
    }
}

struct Emitter {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Compass that pushes a rotating heading from one thread per subscription.
pub struct SimulatedCompass {
    capability: Capability,
    interval: Duration,
    next_id: AtomicU64,
    emitters: Mutex<HashMap<u64, Emitter>>,
}

impl SimulatedCompass {
    pub fn new(interval: Duration) -> Self {
        Self {
            capability: Capability::new("heading", true),
            interval,
            next_id: AtomicU64::new(1),
            emitters: Mutex::new(HashMap::new()),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability.clone()
    }

    fn emitters(&self) -> MutexGuard<'_, HashMap<u64, Emitter>> {
        self.emitters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ListenSource for SimulatedCompass {
    type Reading = CompassReading;

    fn check_available(&self) -> Result<(), ProbeError> {
        self.capability.check()
    }

    fn subscribe(
        &self,
        handler: ReadingHandler<CompassReading>,
    ) -> Result<SubscriptionHandle, ProbeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticker = tick(self.interval);

        let handle = thread::Builder::new()
            .name(format!("compass-{id}"))
            .spawn(move || {
                let mut heading = 0.0_f64;
                loop {
                    let fired = select! {
                        recv(stop_rx) -> _ => false,
                        recv(ticker) -> _ => true,
                    };
                    if !fired {
                        break;
                    }
                    heading = (heading + 7.5) % 360.0;
                    handler(CompassReading {
                        timestamp: Utc::now(),
                        heading,
                    });
                }
            })
            .map_err(|e| ProbeError::Source(format!("could not spawn compass thread: {e}")))?;

        self.emitters().insert(id, Emitter { stop_tx, handle });
        Ok(SubscriptionHandle::new(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let emitter = self.emitters().remove(&handle.id());
        if let Some(Emitter { stop_tx, handle }) = emitter {
            drop(stop_tx);
            if handle.join().is_err() {
                warn!("Compass emitter thread panicked");
            }
        }
    }
}

impl Drop for SimulatedCompass {
    fn drop(&mut self) {
        let emitters: Vec<_> = self.emitters().drain().collect();
        for (_, Emitter { stop_tx, handle }) in emitters {
            drop(stop_tx);
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::Datum;
    use crate::probe::listening::ListeningProbe;
    use crate::probe::polling::PollingProbe;
    use crate::probe::state::{DatumSink, Probe, ProbeState};
    use std::sync::Arc;

    #[derive(Default)]
    struct CollectingSink {
        data: Mutex<Vec<Datum>>,
    }

    impl DatumSink for CollectingSink {
        fn store(&self, datum: Datum) {
            self.data.lock().unwrap().push(datum);
        }
    }

    #[test]
    fn test_location_moves_every_third_read() {
        let mut source = SimulatedLocation::new(47.6, -122.3);
        let readings: Vec<_> = (0..6).filter_map(|_| source.read()).collect();
        assert_eq!(readings.len(), 6);
        assert_eq!(readings[0].latitude, readings[1].latitude);
        assert_ne!(readings[1].latitude, readings[2].latitude);
    }

    #[test]
    fn test_location_disabled_is_unsupported() {
        let mut source = SimulatedLocation::new(0.0, 0.0);
        source.capability().set_enabled(false);
        assert!(matches!(
            source.check_available(),
            Err(ProbeError::Unsupported(_))
        ));
        assert!(source.read().is_none());
    }

    #[test]
    fn test_compass_probe_streams_and_stops() {
        let probe = ListeningProbe::new(SimulatedCompass::new(Duration::from_millis(5)));
        let sink = Arc::new(CollectingSink::default());

        probe.start(sink.clone()).unwrap();
        for _ in 0..200 {
            if sink.data.lock().unwrap().len() >= 3 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        probe.stop();
        assert_eq!(probe.state(), ProbeState::Stopped);

        let stored = sink.data.lock().unwrap().len();
        assert!(stored >= 3);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.data.lock().unwrap().len(), stored);
        assert!(probe.source().emitters().is_empty());
    }

    #[test]
    fn test_accelerometer_probe_produces_data() {
        let probe = PollingProbe::new(SimulatedAccelerometer::new(), Duration::from_millis(5));
        let sink = Arc::new(CollectingSink::default());

        probe.start(sink.clone()).unwrap();
        for _ in 0..200 {
            if !sink.data.lock().unwrap().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        probe.stop();

        let data = sink.data.lock().unwrap();
        assert_eq!(data[0].probe_type(), "accelerometer");
        assert!(data[0].field("z").is_some());
    }
}
