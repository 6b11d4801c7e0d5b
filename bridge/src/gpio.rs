//! Raspberry Pi GPIO buzzer backend
//!
//! Buttons are wired between a BCM pin and ground, so each input uses the
//! internal pull-up and a press shows up as a falling edge.

use crate::hardware::{Hardware, TriggerCallback};
use log::{debug, error, info, warn};
use rppal::gpio::{Event, Gpio, InputPin, Trigger};
use shared::GPIO_BOUNCE_TIME;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub use rppal::gpio::Error as GpioError;

pub struct GpioHardware {
    gpio: Gpio,
    inputs: Mutex<HashMap<u8, InputPin>>,
}

impl GpioHardware {
    /// Opens the GPIO peripheral. Fails off-Pi or without access rights.
    pub fn new() -> Result<Self, GpioError> {
        Ok(Self {
            gpio: Gpio::new()?,
            inputs: Mutex::new(HashMap::new()),
        })
    }

    fn setup_button(&self, pin: u8, callback: TriggerCallback) -> Result<InputPin, GpioError> {
        let mut input = self.gpio.get(pin)?.into_input_pullup();
        input.set_async_interrupt(
            Trigger::FallingEdge,
            Some(GPIO_BOUNCE_TIME),
            move |_event: Event| callback(pin),
        )?;
        Ok(input)
    }
}

impl Hardware for GpioHardware {
    fn register_trigger(&self, pin: u8, callback: TriggerCallback) {
        match self.setup_button(pin, callback) {
            Ok(input) => {
                self.inputs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(pin, input);
                debug!("Button setup on GPIO {}", pin);
            }
            Err(e) => error!("Failed to set up GPIO {}: {}", pin, e),
        }
    }

    fn unregister_all(&self) {
        let inputs: Vec<InputPin> = self
            .inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, input)| input)
            .collect();

        for mut input in inputs {
            if let Err(e) = input.clear_async_interrupt() {
                warn!("Failed to clear interrupt on GPIO {}: {}", input.pin(), e);
            }
        }
        info!("GPIO inputs released");
    }

    fn simulate_trigger(&self, pin: u8) -> bool {
        warn!(
            "Cannot simulate GPIO {}: mock presses need simulated buzzers",
            pin
        );
        false
    }
}
