// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use quicli::prelude::*;
use rpigpio::{Config, Gpio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Cli {
    /// The GPIO pin (BCM numbering)
    pin: u32,
    /// Period in milliseconds
    period_ms: u64,
    /// Duration over which to blink in milliseconds
    duration_ms: u64,
    /// Board model, or "auto" to detect it
    #[structopt(long, default_value = "auto")]
    model: String,
}

fn do_main(args: Cli) -> Result<(), rpigpio::Error> {
    let gpio = Gpio::with_config(Config::from_env().with_consumer("blinky"));
    gpio.init(&args.model)?;
    gpio.set_output(args.pin)?;

    let duration = Duration::from_millis(args.duration_ms);
    let start_time = Instant::now();
    while start_time.elapsed() < duration {
        sleep(Duration::from_millis(args.period_ms));
        gpio.set_high(args.pin)?;
        sleep(Duration::from_millis(args.period_ms));
        gpio.set_low(args.pin)?;
    }

    gpio.cleanup();
    Ok(())
}

fn main() -> CliResult {
    let args = Cli::from_args();
    do_main(args).or_else(|e| {
        error!("{:?}", e);
        Ok(())
    })
}
