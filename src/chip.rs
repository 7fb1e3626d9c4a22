use std::{
    fs::File,
    io,
    os::{
        fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
        unix::ffi::OsStrExt,
    },
    path::{Path, PathBuf},
};

use bstr::ByteSlice;
use tracing::debug;

use crate::{
    fixed_str::FixedStr,
    line::{Direction, LineHandle},
    uapi::{self, v2::LineFlags},
};

pub struct ChipInfo {
    name: FixedStr<{ uapi::v2::GPIO_MAX_NAME_SIZE }>,
    label: FixedStr<{ uapi::v2::GPIO_MAX_NAME_SIZE }>,
    lines: u32,
}

impl ChipInfo {
    /// The name of the device driving this GPIO chip in the kernel
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// A functional name for this GPIO chip, such as a product number.  Might
    /// be an empty string.
    ///
    /// The RP1 bank on a Raspberry Pi 5 is "pinctrl-rp1".
    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    /// The number of lines/pins indexable through this chip
    pub const fn num_lines(&self) -> u32 {
        self.lines
    }
}

impl std::fmt::Debug for ChipInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChipInfo")
            .field("name", &self.name())
            .field("label", &self.label())
            .field("lines", &self.lines)
            .finish()
    }
}

/// A GPIO chip exposed by the kernel as `/dev/gpiochipN`.
///
/// Chips are not guaranteed to be enumerated in the same order across
/// kernels (the Pi 5 RP1 bank moved from `gpiochip4` to `gpiochip0`), so
/// [`find_chip`] can be used to locate one by label.
#[derive(Debug)]
pub struct Chip {
    fd: OwnedFd,
    path: PathBuf,
}

impl Chip {
    /// Open the GPIO Chip at the provided path (e.g. `/dev/gpiochip<N>`)
    pub fn open(p: &Path) -> io::Result<Self> {
        let f = std::fs::OpenOptions::new().read(true).write(true).open(p)?;
        let this = Self {
            fd: OwnedFd::from(f),
            path: p.to_owned(),
        };
        // Make sure this actually is a gpio chip
        let _ = this.info()?;
        Ok(this)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> io::Result<ChipInfo> {
        let mut info = uapi::gpio_chip_info::zeroed();
        // SAFETY: `info` is a properly sized gpiochip_info the kernel fills in
        unsafe { uapi::gpio_get_chipinfo(self.fd.as_raw_fd(), &mut info)? };

        Ok(ChipInfo {
            name: FixedStr::from_byte_array(info.name)?,
            label: FixedStr::from_byte_array(info.label)?,
            lines: info.lines,
        })
    }

    /// Request exclusive use of the line at `offset`.
    ///
    /// The direction is fixed for the lifetime of the returned handle. For
    /// outputs, `initial` is driven as soon as the request succeeds.
    pub fn request_line(
        &self,
        consumer: &str,
        offset: u32,
        direction: Direction,
        initial: bool,
    ) -> io::Result<LineHandle> {
        let mut req = uapi::v2::gpio_line_request::zeroed();
        req.num_lines = 1;
        req.offsets[0] = offset;
        req.consumer = FixedStr::new(consumer)?.into_byte_array();

        match direction {
            Direction::Input => {
                req.config.flags = LineFlags::INPUT | LineFlags::BIAS_DISABLED;
            }
            Direction::Output => {
                req.config.flags = LineFlags::OUTPUT;
                let values = uapi::v2::gpio_line_attribute::output_values(u64::from(initial));
                req.config.push_attr(values, 1);
            }
        }

        // SAFETY: the request is fully initialized and outlives the call
        unsafe { uapi::v2::gpio_get_line(self.fd.as_raw_fd(), &mut req)? };

        // SAFETY: on success the kernel hands us a new line fd that nothing else owns
        let fd = unsafe { OwnedFd::from_raw_fd(req.fd) };
        debug!(chip = %self.path.display(), offset, ?direction, "requested line");

        Ok(LineHandle::new(File::from(fd), offset, direction))
    }
}

impl AsRawFd for Chip {
    #[inline(always)]
    fn as_raw_fd(&self) -> std::os::unix::prelude::RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Chip {
    #[inline(always)]
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Iterate over all GPIO chips currently present on this system
pub fn chips() -> io::Result<ChipIterator> {
    Ok(ChipIterator {
        readdir: std::fs::read_dir("/dev")?,
    })
}

/// Find the first chip whose label matches `label`
pub fn find_chip(label: &str) -> io::Result<Option<Chip>> {
    for chip in chips()? {
        let Ok(chip) = chip else {
            continue;
        };
        if chip.info()?.label() == label {
            return Ok(Some(chip));
        }
    }
    Ok(None)
}

/// Iterator over chips
#[derive(Debug)]
pub struct ChipIterator {
    readdir: std::fs::ReadDir,
}

impl Iterator for ChipIterator {
    type Item = io::Result<Chip>;

    fn next(&mut self) -> Option<io::Result<Chip>> {
        for entry in &mut self.readdir {
            let e = match entry {
                Ok(e) => e,
                Err(e) => {
                    return Some(Err(e));
                }
            };
            let p = e.path();
            let Some(f) = p.file_name() else {
                continue;
            };
            if f.as_bytes().starts_with_str("gpiochip") {
                return Some(Chip::open(&p));
            }
        }

        None
    }
}
