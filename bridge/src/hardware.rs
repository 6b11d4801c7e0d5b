//! Buzzer hardware seam with a simulated backend
//!
//! Builds with the `gpio` feature add a Raspberry Pi backend in
//! `gpio`; [`open_backend`] prefers it and falls back to
//! [`MockHardware`].

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Called with the pin number that fired.
pub type TriggerCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Buzzer input lines. Callbacks may fire on any thread.
pub trait Hardware: Send + Sync {
    fn register_trigger(&self, pin: u8, callback: TriggerCallback);
    fn unregister_all(&self);
    /// Fires the callback registered for `pin`, if any.
    fn simulate_trigger(&self, pin: u8) -> bool;
}

/// In-memory backend for development machines and tests.
#[derive(Default)]
pub struct MockHardware {
    callbacks: Mutex<HashMap<u8, TriggerCallback>>,
}

impl MockHardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registered_pins(&self) -> Vec<u8> {
        let mut pins: Vec<u8> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        pins.sort_unstable();
        pins
    }
}

impl Hardware for MockHardware {
    fn register_trigger(&self, pin: u8, callback: TriggerCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pin, callback);
        debug!("Mock: Button setup on pin {}", pin);
    }

    fn unregister_all(&self) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn simulate_trigger(&self, pin: u8) -> bool {
        let callback = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pin)
            .cloned();

        match callback {
            Some(callback) => {
                info!("Mock: Button {} pressed!", pin);
                callback(pin);
                true
            }
            None => {
                warn!("Mock: no button registered on pin {}", pin);
                false
            }
        }
    }
}

/// Which buzzer backend the bridge ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Gpio,
    Simulated,
}

/// Opens the real GPIO backend when this build and machine support it,
/// otherwise the simulated one.
pub fn open_backend() -> (Arc<dyn Hardware>, BackendKind) {
    match open_gpio() {
        Some(gpio) => (gpio, BackendKind::Gpio),
        None => (Arc::new(MockHardware::new()), BackendKind::Simulated),
    }
}

#[cfg(feature = "gpio")]
fn open_gpio() -> Option<Arc<dyn Hardware>> {
    match crate::gpio::GpioHardware::new() {
        Ok(gpio) => {
            info!("Using GPIO buzzers");
            Some(Arc::new(gpio))
        }
        Err(e) => {
            warn!("GPIO not available ({}), running in mock mode", e);
            None
        }
    }
}

#[cfg(not(feature = "gpio"))]
fn open_gpio() -> Option<Arc<dyn Hardware>> {
    warn!("Built without GPIO support, running in mock mode");
    None
}
