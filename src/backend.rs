//! Hardware access strategies
//!
//! A [`Backend`] is opened once per controller session for a resolved
//! [`BoardProfile`] and stays the same until the session is cleaned up.

use tracing::debug;

use crate::{
    board::{Addressing, BoardProfile, HostInfo},
    config::Config,
    errors::Result,
    line::Direction,
};

pub mod lines;
pub mod registers;

pub use lines::{LineCache, LineSource, RequestedLine};
pub use registers::Registers;

/// Raw pin primitives shared by every access strategy.
///
/// Offsets are already validated against the board profile; backends still
/// reject anything outside what they actually opened.
pub trait Backend: Send + Sync {
    fn set_direction(&self, offset: u32, direction: Direction) -> Result<()>;

    fn set_high(&self, offset: u32) -> Result<()>;

    fn set_low(&self, offset: u32) -> Result<()>;

    fn read(&self, offset: u32) -> Result<bool>;

    /// Release every resource held by the backend
    fn close(self)
    where
        Self: Sized,
    {
        drop(self)
    }
}

/// Source of backends and host information for a controller
pub trait Connector: Send + Sync {
    type Backend: Backend;

    fn connect(&self, profile: &BoardProfile) -> Result<Self::Backend>;

    fn host(&self) -> HostInfo;
}

/// Either of the two real access strategies, picked by the profile's
/// addressing mode
#[derive(Debug)]
pub enum Strategy {
    Registers(Registers),
    CharDevice(LineCache),
}

impl Backend for Strategy {
    fn set_direction(&self, offset: u32, direction: Direction) -> Result<()> {
        match self {
            Strategy::Registers(r) => r.set_direction(offset, direction),
            Strategy::CharDevice(l) => l.set_direction(offset, direction),
        }
    }

    fn set_high(&self, offset: u32) -> Result<()> {
        match self {
            Strategy::Registers(r) => r.set_high(offset),
            Strategy::CharDevice(l) => l.set_high(offset),
        }
    }

    fn set_low(&self, offset: u32) -> Result<()> {
        match self {
            Strategy::Registers(r) => r.set_low(offset),
            Strategy::CharDevice(l) => l.set_low(offset),
        }
    }

    fn read(&self, offset: u32) -> Result<bool> {
        match self {
            Strategy::Registers(r) => r.read(offset),
            Strategy::CharDevice(l) => l.read(offset),
        }
    }

    fn close(self) {
        match self {
            Strategy::Registers(r) => r.close(),
            Strategy::CharDevice(l) => l.close(),
        }
    }
}

/// Connects to the devices of the running system
#[derive(Debug, Clone, Default)]
pub struct SystemConnector {
    config: Config,
}

impl SystemConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Connector for SystemConnector {
    type Backend = Strategy;

    fn connect(&self, profile: &BoardProfile) -> Result<Strategy> {
        debug!(profile = profile.name(), addressing = ?profile.addressing(), "opening backend");
        match profile.addressing() {
            Addressing::MemoryMapped => Registers::open(profile, &self.config).map(Strategy::Registers),
            Addressing::CharDevice => LineCache::open(&self.config).map(Strategy::CharDevice),
        }
    }

    fn host(&self) -> HostInfo {
        HostInfo::probe(self.config.pi5_probe())
    }
}
