use std::fmt;
use std::io::Error as IOError;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Stable numeric codes for failures on the hardware path.
///
/// These are the values a native caller sees; they never change between
/// releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    DevMem = -1,
    Mmap = -2,
    Offset = -3,
    Gpiod = -4,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 4] = [
        ErrorCode::DevMem,
        ErrorCode::Mmap,
        ErrorCode::Offset,
        ErrorCode::Gpiod,
    ];

    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn description(self) -> &'static str {
        match self {
            ErrorCode::DevMem => "Failed to open /dev/mem or /dev/gpiomem",
            ErrorCode::Mmap => "Memory mapping failed",
            ErrorCode::Offset => "Invalid GPIO offset or register access",
            ErrorCode::Gpiod => "GPIO character device access failed",
        }
    }

    /// Map a raw code back to its kind.
    ///
    /// Codes outside the known set are reported as [`ErrorCode::DevMem`], the
    /// catch-all hardware error, instead of failing.
    pub fn from_code(code: i32) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .unwrap_or(ErrorCode::DevMem)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (code: {})", self.description(), self.code())
    }
}

/// Character device operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpiodOp {
    OpenChip,
    ChipInfo,
    RequestLine,
    GetValue,
    SetValue,
}

impl fmt::Display for GpiodOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            GpiodOp::OpenChip => "opening the gpio chip",
            GpiodOp::ChipInfo => "reading chip info",
            GpiodOp::RequestLine => "requesting a line",
            GpiodOp::GetValue => "reading a line value",
            GpiodOp::SetValue => "writing a line value",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to open {}: {source}", .path.display())]
    DevMem { path: PathBuf, source: IOError },
    #[error("Memory mapping of {len:#x} bytes at {base:#x} failed: {source}")]
    Mmap {
        base: u64,
        len: usize,
        source: IOError,
    },
    #[error("Offset {0} is out of range")]
    Offset(u32),
    #[error("GPIO character device failed while {op}: {source}")]
    Gpiod { op: GpiodOp, source: IOError },
    #[error("Unsupported architecture: {0}. This library only supports ARM (Raspberry Pi).")]
    UnsupportedArchitecture(String),
    #[error("Unknown board model: {0}")]
    UnknownModel(String),
    #[error("Failed to load GPIO backend: {0}")]
    NativeLoad(String),
}

impl Error {
    pub(crate) fn gpiod(op: GpiodOp) -> impl FnOnce(IOError) -> Self {
        move |source| Error::Gpiod { op, source }
    }

    /// The numeric code of a hardware-path failure.
    ///
    /// Board resolution and backend loading failures happen before any
    /// hardware is touched and carry no code.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::DevMem { .. } => Some(ErrorCode::DevMem),
            Error::Mmap { .. } => Some(ErrorCode::Mmap),
            Error::Offset(_) => Some(ErrorCode::Offset),
            Error::Gpiod { .. } => Some(ErrorCode::Gpiod),
            Error::UnsupportedArchitecture(_) | Error::UnknownModel(_) | Error::NativeLoad(_) => {
                None
            }
        }
    }
}
