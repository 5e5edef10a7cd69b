//! Sensor source interfaces consumed by probes.
//!
//! Platform bindings live outside this crate. They plug in either as a
//! pollable read or as a subscribe/unsubscribe pair.

use crate::datum::Reading;
use crate::probe::state::ProbeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A sensor that is read on a timer.
pub trait PollSource: Send + 'static {
    type Reading: Reading;

    /// Check that the capability is present and enabled.
    fn check_available(&mut self) -> Result<(), ProbeError>;

    /// Take one reading. `None` means invalid or no new data.
    fn read(&mut self) -> Option<Self::Reading>;
}

/// Callback a listening probe registers with its source.
pub type ReadingHandler<R> = Arc<dyn Fn(R) + Send + Sync>;

/// Opaque token identifying one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A sensor that pushes readings to registered handlers from its own thread.
pub trait ListenSource: Send + Sync + 'static {
    type Reading: Reading;

    fn check_available(&self) -> Result<(), ProbeError>;

    fn subscribe(
        &self,
        handler: ReadingHandler<Self::Reading>,
    ) -> Result<SubscriptionHandle, ProbeError>;

    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Shared on/off switch for a device capability (e.g. location services).
#[derive(Debug, Clone)]
pub struct Capability {
    name: &'static str,
    enabled: Arc<AtomicBool>,
}

impl Capability {
    pub fn new(name: &'static str, enabled: bool) -> Self {
        Self {
            name,
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), ProbeError> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(ProbeError::Unsupported(format!(
                "{} is not enabled on this device",
                self.name
            )))
        }
    }
}
