use std::{
    fs::File,
    io::Result,
    os::fd::{AsFd, AsRawFd, BorrowedFd},
};

use crate::uapi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub const fn is_output(self) -> bool {
        matches!(self, Direction::Output)
    }
}

impl From<bool> for Direction {
    /// `true` selects [`Direction::Output`]
    fn from(output: bool) -> Self {
        if output {
            Direction::Output
        } else {
            Direction::Input
        }
    }
}

/// A single requested line.
///
/// The line is released when the handle is dropped.
#[derive(Debug)]
pub struct LineHandle {
    line_fd: File,
    offset: u32,
    direction: Direction,
}

impl LineHandle {
    pub(crate) fn new(line_fd: File, offset: u32, direction: Direction) -> Self {
        Self {
            line_fd,
            offset,
            direction,
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current level of the line (the driven level for outputs)
    pub fn get_value(&self) -> Result<bool> {
        let mut data = uapi::v2::gpio_line_values { bits: 0, mask: 1 };
        // SAFETY: `data` is a valid gpio_v2_line_values for the duration of the call
        unsafe { uapi::v2::gpio_line_get_values(self.line_fd.as_raw_fd(), &mut data)? };
        Ok(data.bits & 1 != 0)
    }

    pub fn set_value(&self, value: bool) -> Result<()> {
        let mut data = uapi::v2::gpio_line_values {
            bits: u64::from(value),
            mask: 1,
        };
        // SAFETY: `data` is a valid gpio_v2_line_values for the duration of the call
        unsafe { uapi::v2::gpio_line_set_values(self.line_fd.as_raw_fd(), &mut data)? };
        Ok(())
    }
}

impl AsFd for LineHandle {
    #[inline(always)]
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.line_fd.as_fd()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn direction_from_bool() {
        assert_eq!(Direction::from(true), Direction::Output);
        assert_eq!(Direction::from(false), Direction::Input);
        assert!(Direction::Output.is_output());
        assert!(!Direction::Input.is_output());
    }
}
