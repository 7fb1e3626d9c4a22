//! Direct access to the BCM283x/BCM2711 GPIO register block through
//! `/dev/gpiomem` or `/dev/mem`.

use std::{
    fs::File,
    io,
    os::{fd::AsRawFd, unix::fs::OpenOptionsExt},
    path::Path,
    ptr::{self, NonNull},
    sync::{Mutex, PoisonError},
};

use tracing::{debug, warn};

use crate::{
    backend::Backend,
    board::{self, BoardProfile},
    config::Config,
    errors::{Error, Result},
    line::Direction,
};

// Word indices into the register block
const GPFSEL0: usize = 0;
const GPSET0: usize = 7;
const GPCLR0: usize = 10;
const GPLEV0: usize = 13;

/// Highest GPIO count of any supported SoC (BCM2711)
const MAX_PINS: u32 = 58;

const FSEL_INPUT: u32 = 0b000;
const FSEL_OUTPUT: u32 = 0b001;
const FSEL_MASK: u32 = 0b111;

enum Mapping {
    Device { _file: File, phys: u64, len: usize },
    #[cfg(test)]
    Heap,
}

/// A mapped GPIO register block.
///
/// Level changes go through the SET and CLR registers, which only affect
/// the bits written, so they need no locking. Function select registers
/// are read-modify-write and are serialized internally.
///
/// Writing a level to a pin that is not an output switches it to output
/// first, so a pin left in its reset state still gets driven.
pub struct Registers {
    base: NonNull<u32>,
    words: usize,
    mapping: Mapping,
    fsel: Mutex<()>,
}

// SAFETY: the mapping is only touched through volatile word accesses; the
// one read-modify-write sequence is guarded by `fsel`.
unsafe impl Send for Registers {}
unsafe impl Sync for Registers {}

impl Registers {
    /// Map the register block for `profile`.
    ///
    /// `/dev/gpiomem` is preferred since it exposes only the GPIO block and
    /// needs no root. `/dev/mem` requires the physical address, taken from
    /// the device tree when available.
    pub fn open(profile: &BoardProfile, config: &Config) -> Result<Self> {
        match open_device(config.gpiomem()) {
            Ok(file) => {
                debug!(path = %config.gpiomem().display(), "mapping gpio registers");
                Self::map(file, 0, profile.block_size())
            }
            Err(err) => {
                debug!(path = %config.gpiomem().display(), %err, "falling back to physical memory");
                let file = open_device(config.devmem()).map_err(|source| Error::DevMem {
                    path: config.devmem().to_owned(),
                    source,
                })?;
                let base = register_base(profile, config.soc_ranges());
                debug!(path = %config.devmem().display(), base, "mapping gpio registers");
                Self::map(file, base, profile.block_size())
            }
        }
    }

    fn map(file: File, phys: u64, len: usize) -> Result<Self> {
        let mmap_err = |source| Error::Mmap {
            base: phys,
            len,
            source,
        };

        let offset = map_offset(phys).map_err(mmap_err)?;

        // SAFETY: a fresh shared mapping of a device we hold open; the kernel
        // picks the address.
        let ptr = unsafe {
            mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(mmap_err(io::Error::last_os_error()));
        }
        let base = NonNull::new(ptr.cast::<u32>())
            .ok_or_else(|| mmap_err(io::Error::other("mmap returned a null mapping")))?;

        Ok(Self {
            base,
            words: len / 4,
            mapping: Mapping::Device {
                _file: file,
                phys,
                len,
            },
            fsel: Mutex::new(()),
        })
    }

    fn reg(&self, word: usize, offset: u32) -> Result<*mut u32> {
        if offset >= MAX_PINS || word >= self.words {
            return Err(Error::Offset(offset));
        }
        // SAFETY: `word` is inside the mapping
        Ok(unsafe { self.base.as_ptr().add(word) })
    }

    /// Register word and bit of `offset` in a one-bit-per-pin bank
    fn bank(first: usize, offset: u32) -> (usize, u32) {
        (first + (offset / 32) as usize, 1 << (offset % 32))
    }

    fn write_bank(&self, first: usize, offset: u32) -> Result<()> {
        let (word, bit) = Self::bank(first, offset);
        let reg = self.reg(word, offset)?;
        // SAFETY: `reg` points into the mapping
        unsafe { ptr::write_volatile(reg, bit) };
        Ok(())
    }

    /// Function select word and bit shift of `offset`
    fn fsel_reg(&self, offset: u32) -> Result<(*mut u32, u32)> {
        let word = GPFSEL0 + (offset / 10) as usize;
        Ok((self.reg(word, offset)?, (offset % 10) * 3))
    }

    /// Set the pin function of `offset`. With `keep_output`, a pin that is
    /// already an output is left alone.
    fn select(&self, offset: u32, fsel: u32, keep_output: bool) -> Result<()> {
        let (reg, shift) = self.fsel_reg(offset)?;
        let is_output = || {
            // SAFETY: `reg` points into the mapping
            let v = unsafe { ptr::read_volatile(reg) };
            (v >> shift) & FSEL_MASK == FSEL_OUTPUT
        };
        if keep_output && is_output() {
            return Ok(());
        }

        let _guard = self.fsel.lock().unwrap_or_else(PoisonError::into_inner);
        if keep_output && is_output() {
            return Ok(());
        }
        // SAFETY: `reg` points into the mapping
        unsafe {
            let v = ptr::read_volatile(reg);
            ptr::write_volatile(reg, (v & !(FSEL_MASK << shift)) | (fsel << shift));
        }
        Ok(())
    }

    /// Latch a level for `offset` and make sure the pin drives it
    fn drive(&self, first: usize, offset: u32) -> Result<()> {
        // The level is latched before the function switch so the pin comes
        // up at it
        self.write_bank(first, offset)?;
        self.select(offset, FSEL_OUTPUT, true)
    }
}

impl Backend for Registers {
    fn set_direction(&self, offset: u32, direction: Direction) -> Result<()> {
        let fsel = match direction {
            Direction::Input => FSEL_INPUT,
            Direction::Output => FSEL_OUTPUT,
        };
        self.select(offset, fsel, false)
    }

    fn set_high(&self, offset: u32) -> Result<()> {
        self.drive(GPSET0, offset)
    }

    fn set_low(&self, offset: u32) -> Result<()> {
        self.drive(GPCLR0, offset)
    }

    fn read(&self, offset: u32) -> Result<bool> {
        let (word, bit) = Self::bank(GPLEV0, offset);
        let reg = self.reg(word, offset)?;
        // SAFETY: `reg` points into the mapping
        let v = unsafe { ptr::read_volatile(reg) };
        Ok(v & bit != 0)
    }
}

impl Drop for Registers {
    fn drop(&mut self) {
        match self.mapping {
            Mapping::Device { len, .. } => {
                // SAFETY: unmapping exactly what `map` mapped; no references outlive self
                let res = unsafe { libc::munmap(self.base.as_ptr().cast(), len) };
                if res != 0 {
                    warn!(err = %io::Error::last_os_error(), "failed to unmap gpio registers");
                }
            }
            #[cfg(test)]
            Mapping::Heap => {
                // SAFETY: allocated by `in_memory` with exactly `words` elements
                drop(unsafe {
                    Box::from_raw(ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.words))
                });
            }
        }
    }
}

impl std::fmt::Debug for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Registers");
        match &self.mapping {
            Mapping::Device { phys, len, .. } => {
                s.field("phys", &format_args!("{phys:#x}")).field("len", len)
            }
            #[cfg(test)]
            Mapping::Heap => s.field("words", &self.words),
        };
        s.finish()
    }
}

// 32-bit targets have a 32-bit off_t, too small for BCM2711 physical addresses
#[cfg(all(target_os = "linux", target_env = "gnu"))]
use libc::{mmap64 as mmap, off64_t as MapOffset};
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
use libc::{mmap, off_t as MapOffset};

fn map_offset(phys: u64) -> io::Result<MapOffset> {
    MapOffset::try_from(phys).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "register base does not fit in a file offset",
        )
    })
}

fn open_device(path: &Path) -> io::Result<File> {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC | libc::O_CLOEXEC)
        .open(path)
}

/// Physical address of the GPIO block, preferring the device tree over the
/// profile default
fn register_base(profile: &BoardProfile, soc_ranges: &Path) -> u64 {
    match std::fs::read(soc_ranges) {
        Ok(ranges) => match board::peripheral_base(&ranges) {
            Some(base) => base + board::GPIO_BLOCK_OFFSET,
            None => profile.register_base(),
        },
        Err(err) => {
            debug!(path = %soc_ranges.display(), %err, "no device tree ranges, using profile base");
            profile.register_base()
        }
    }
}

#[cfg(test)]
impl Registers {
    /// Zeroed register block backed by heap memory
    pub(crate) fn in_memory() -> Self {
        let words = crate::board::BLOCK_SIZE / 4;
        let block: Box<[u32]> = vec![0; words].into_boxed_slice();
        let base = NonNull::new(Box::into_raw(block).cast::<u32>()).expect("box is non-null");
        Self {
            base,
            words,
            mapping: Mapping::Heap,
            fsel: Mutex::new(()),
        }
    }

    pub(crate) fn peek(&self, word: usize) -> u32 {
        assert!(word < self.words);
        unsafe { ptr::read_volatile(self.base.as_ptr().add(word)) }
    }

    pub(crate) fn poke(&self, word: usize, value: u32) {
        assert!(word < self.words);
        unsafe { ptr::write_volatile(self.base.as_ptr().add(word), value) }
    }
}
