//! Process-wide controller behind the free functions of the crate root.
//!
//! Statics are never dropped, so the first use registers an `atexit`
//! handler that releases the backend on normal process exit.

use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::{errors::Result, gpio::Gpio, line::Direction};

static GLOBAL: OnceLock<Gpio> = OnceLock::new();

extern "C" fn release_at_exit() {
    if let Some(gpio) = GLOBAL.get() {
        gpio.cleanup();
    }
}

/// The shared controller, created from the environment on first use
pub fn global() -> &'static Gpio {
    GLOBAL.get_or_init(|| {
        // SAFETY: `release_at_exit` is a plain extern "C" fn without unwinding
        if unsafe { libc::atexit(release_at_exit) } != 0 {
            warn!("could not register gpio release at exit");
        } else {
            debug!("registered gpio release at exit");
        }
        Gpio::new()
    })
}

/// Initialize the shared controller for `model` (`"auto"` to probe the host)
pub fn init(model: &str) -> Result<()> {
    global().init(model)
}

pub fn set_direction(pin: u32, direction: Direction) -> Result<()> {
    global().set_direction(pin, direction)
}

pub fn set_input(pin: u32) -> Result<()> {
    global().set_input(pin)
}

pub fn set_output(pin: u32) -> Result<()> {
    global().set_output(pin)
}

pub fn set_high(pin: u32) -> Result<()> {
    global().set_high(pin)
}

pub fn set_low(pin: u32) -> Result<()> {
    global().set_low(pin)
}

pub fn set(pin: u32, state: bool) -> Result<()> {
    global().set(pin, state)
}

pub fn read(pin: u32) -> Result<bool> {
    global().read(pin)
}

/// Release the shared controller's backend. Always succeeds.
pub fn cleanup() {
    if let Some(gpio) = GLOBAL.get() {
        gpio.cleanup();
    }
}
