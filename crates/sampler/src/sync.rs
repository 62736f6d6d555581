//! Sync request and acknowledge lines

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embedded_hal::digital::{InputPin, OutputPin};
use tracing::trace;

/// Sync handshake with the companion device
pub trait SyncSignal {
    /// Whether the companion is requesting a sync marker
    fn is_asserted(&mut self) -> bool;

    /// Drive the acknowledge line
    fn set_acknowledge(&mut self, high: bool);
}

/// No companion attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSync;

impl SyncSignal for NoSync {
    fn is_asserted(&mut self) -> bool {
        false
    }

    fn set_acknowledge(&mut self, _high: bool) {}
}

/// Handshake over GPIO
pub struct HandshakePins<I, O> {
    request: I,
    acknowledge: O,
}

impl<I: InputPin, O: OutputPin> HandshakePins<I, O> {
    pub fn new(request: I, acknowledge: O) -> Self {
        Self {
            request,
            acknowledge,
        }
    }
}

impl<I: InputPin, O: OutputPin> SyncSignal for HandshakePins<I, O> {
    fn is_asserted(&mut self) -> bool {
        // An unreadable line counts as idle.
        self.request.is_high().unwrap_or(false)
    }

    fn set_acknowledge(&mut self, high: bool) {
        let result = if high {
            self.acknowledge.set_high()
        } else {
            self.acknowledge.set_low()
        };
        if result.is_err() {
            trace!(high, "Acknowledge line write failed");
        }
    }
}

/// Handshake lines shared between threads, for host runs
#[derive(Debug, Clone, Default)]
pub struct SharedSyncLine {
    request: Arc<AtomicBool>,
    acknowledge: Arc<AtomicBool>,
}

impl SharedSyncLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Companion side: raise or drop the request
    pub fn request(&self, asserted: bool) {
        self.request.store(asserted, Ordering::Release);
    }

    /// Companion side: current acknowledge level
    pub fn acknowledged(&self) -> bool {
        self.acknowledge.load(Ordering::Acquire)
    }
}

impl SyncSignal for SharedSyncLine {
    fn is_asserted(&mut self) -> bool {
        self.request.load(Ordering::Acquire)
    }

    fn set_acknowledge(&mut self, high: bool) {
        self.acknowledge.store(high, Ordering::Release);
    }
}
