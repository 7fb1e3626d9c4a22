//! Board identification
//!
//! Resolves a model name (or `"auto"`) to the [`BoardProfile`] describing
//! which register layout and access path apply to the running host.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::errors::{Error, Result};

/// Offset of the GPIO register block from the start of the peripheral window
pub const GPIO_BLOCK_OFFSET: u64 = 0x20_0000;

/// Size of the register window mapped for every memory-mapped family
pub const BLOCK_SIZE: usize = 4096;

/// SoC family of the host, as far as GPIO addressing is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// BCM2835 boards addressed explicitly (Pi 1, Zero)
    Legacy32,
    /// 64-bit userspace on a pre-Pi 5 board.
    ///
    /// The profile base is the BCM2711 one (Pi 4). A Pi 3 on a 64-bit OS only
    /// maps the right window through `/dev/mem` when the device tree ranges
    /// are readable; `/dev/gpiomem` is unaffected.
    Arm64,
    /// Pi 5, where GPIOs live behind the RP1 and are only reachable through the character device
    Arm64Pi5,
    Armv7,
    Armv6_32,
    Armv6_64,
}

impl Family {
    pub const ALL: [Family; 6] = [
        Family::Legacy32,
        Family::Arm64,
        Family::Arm64Pi5,
        Family::Armv7,
        Family::Armv6_32,
        Family::Armv6_64,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Family::Legacy32 => "linux-arm",
            Family::Arm64 => "linux-aarch64",
            Family::Arm64Pi5 => "linux-aarch64-pi5",
            Family::Armv7 => "linux-armv7",
            Family::Armv6_32 => "linux-armv6-32",
            Family::Armv6_64 => "linux-armv6-64",
        }
    }

    /// Pick the family for a host.
    ///
    /// The result only depends on the architecture string, whether the Pi 5
    /// GPIO chip node exists and the pointer width.
    pub fn from_host(host: &HostInfo) -> Result<Self> {
        let arch = host.arch.to_ascii_lowercase();

        let family = if arch.contains("aarch64") || arch.contains("arm64") {
            if host.pi5_chip_present {
                Family::Arm64Pi5
            } else {
                Family::Arm64
            }
        } else if arch.contains("armv7") || arch.contains("armhf") {
            Family::Armv7
        } else if arch.contains("arm") {
            if host.pointer_width == 32 {
                Family::Armv6_32
            } else {
                Family::Armv6_64
            }
        } else {
            return Err(Error::UnsupportedArchitecture(host.arch.clone()));
        };

        Ok(family)
    }

    pub const fn profile(self) -> BoardProfile {
        let (register_base, pin_count, addressing) = match self {
            Family::Legacy32 | Family::Armv6_32 => (0x2020_0000, 54, Addressing::MemoryMapped),
            Family::Armv6_64 | Family::Armv7 => (0x3F20_0000, 54, Addressing::MemoryMapped),
            Family::Arm64 => (0xFE20_0000, 58, Addressing::MemoryMapped),
            // RP1 io_bank0 behind PCIe; the header exposes lines 0..=27.
            Family::Arm64Pi5 => (0x1F_000D_0000, 28, Addressing::CharDevice),
        };

        BoardProfile {
            family: self,
            register_base,
            block_size: BLOCK_SIZE,
            pin_count,
            addressing,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the GPIO registers of a family are reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    MemoryMapped,
    CharDevice,
}

/// Requested model, either probed or named explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Auto,
    Explicit(Family),
}

impl FromStr for Model {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let family = match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => return Ok(Model::Auto),
            "linux-arm" | "legacy" => Family::Legacy32,
            "linux-aarch64" | "aarch64" | "arm64" | "pi4" | "pi400" | "cm4" => Family::Arm64,
            "linux-aarch64-pi5" | "pi5" | "cm5" => Family::Arm64Pi5,
            "linux-armv7" | "armv7" | "armhf" | "pi2" | "pi3" => Family::Armv7,
            "linux-armv6-32" | "armv6" | "pi1" | "zero" | "zerow" => Family::Armv6_32,
            "linux-armv6-64" | "zero2" | "zero2w" => Family::Armv6_64,
            _ => return Err(Error::UnknownModel(s.to_owned())),
        };
        Ok(Model::Explicit(family))
    }
}

/// Facts about the running host that drive `"auto"` resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub arch: String,
    pub pi5_chip_present: bool,
    pub pointer_width: u32,
}

impl HostInfo {
    /// Probe the running system.
    ///
    /// The architecture comes from `uname(2)`, falling back to the compile
    /// target if that fails.
    pub fn probe(pi5_node: &Path) -> Self {
        let arch = match nix::sys::utsname::uname() {
            Ok(uts) => uts.machine().to_string_lossy().into_owned(),
            Err(err) => {
                debug!(%err, "uname failed, using compile target architecture");
                std::env::consts::ARCH.to_owned()
            }
        };

        let host = HostInfo {
            arch,
            pi5_chip_present: pi5_node.exists(),
            pointer_width: usize::BITS,
        };
        debug!(?host, "probed host");
        host
    }
}

/// Resolved description of the GPIO hardware of a board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardProfile {
    family: Family,
    register_base: u64,
    block_size: usize,
    pin_count: u32,
    addressing: Addressing,
}

impl BoardProfile {
    /// Resolve a model string to a profile.
    ///
    /// `host` is only consulted for `"auto"`.
    pub fn resolve(model: &str, host: impl FnOnce() -> HostInfo) -> Result<Self> {
        let family = match model.parse::<Model>()? {
            Model::Auto => Family::from_host(&host())?,
            Model::Explicit(family) => family,
        };
        Ok(family.profile())
    }

    pub const fn family(&self) -> Family {
        self.family
    }

    pub const fn name(&self) -> &'static str {
        self.family.name()
    }

    /// Physical address of the GPIO register block
    pub const fn register_base(&self) -> u64 {
        self.register_base
    }

    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    pub const fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub const fn addressing(&self) -> Addressing {
        self.addressing
    }

    pub const fn with_register_base(self, register_base: u64) -> Self {
        Self {
            register_base,
            ..self
        }
    }

    /// Translate a pin number into the offset handed to the backend.
    pub fn offset(&self, pin: u32) -> Result<u32> {
        if pin < self.pin_count {
            Ok(pin)
        } else {
            Err(Error::Offset(pin))
        }
    }
}

/// Extract the peripheral base address from the device tree `soc/ranges`
/// property.
///
/// Older SoCs carry the address in the second cell; the BCM2711 uses two
/// parent address cells, leaving the second cell zero and the address in
/// the third.
pub fn peripheral_base(ranges: &[u8]) -> Option<u64> {
    let cell = |idx: usize| -> Option<u32> {
        let bytes = ranges.get(idx * 4..idx * 4 + 4)?;
        Some(u32::from_be_bytes(bytes.try_into().ok()?))
    };

    match cell(1)? {
        0 => cell(2).filter(|v| *v != 0).map(u64::from),
        base => Some(u64::from(base)),
    }
}
