// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `rpigpio` crate drives the GPIO pins of a Raspberry Pi from userspace:
//! pin direction, digital reads and digital writes.
//!
//! The board is identified at initialization, either from an explicit model
//! name or by probing the host (`"auto"`). Boards up to the Pi 4 are driven
//! by mapping the GPIO register block through `/dev/gpiomem` (or `/dev/mem`
//! as root) and toggling pins through the SoC's atomic set/clear registers.
//! The Pi 5 exposes its GPIOs only through the RP1, so there the [GPIO
//! character device ABI](https://www.kernel.org/doc/Documentation/ABI/testing/gpio-cdev)
//! is used instead.
//!
//! # Examples
//!
//! Using the process-wide controller, which initializes itself on first use:
//!
//! ```no_run
//! # fn main() -> Result<(), rpigpio::Error> {
//! rpigpio::set_output(4)?;
//! rpigpio::set_high(4)?;
//! let state = rpigpio::read(27)?;
//! println!("GPIO27: {}", state);
//! rpigpio::cleanup();
//! # Ok(()) }
//! ```
//!
//! With an explicitly owned controller and configuration:
//!
//! ```no_run
//! use rpigpio::{Config, Direction, Gpio};
//!
//! # fn main() -> Result<(), rpigpio::Error> {
//! let gpio = Gpio::with_config(Config::default().with_consumer("heater"));
//! gpio.init("pi4")?;
//! gpio.set_direction(17, Direction::Output)?;
//! gpio.set(17, true)?;
//! // The backend is released when `gpio` is dropped
//! # Ok(()) }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

mod errors;
mod global;

pub mod backend;
pub mod board;
pub mod chip;
pub mod config;
pub mod fixed_str;
pub mod gpio;
pub mod line;

#[allow(non_camel_case_types)]
pub mod uapi;

pub use backend::{Backend, Connector, SystemConnector};
pub use board::{Addressing, BoardProfile, Family, HostInfo, Model};
pub use chip::{chips, Chip};
pub use config::Config;
pub use errors::{Error, ErrorCode, GpiodOp, Result};
pub use global::{
    cleanup, global, init, read, set, set_direction, set_high, set_input, set_low, set_output,
};
pub use gpio::{Gpio, State};
pub use line::Direction;
