// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use bitflags::bitflags;
use nix::ioctl_readwrite;

pub const GPIO_LINES_MAX: usize = 64;
pub const GPIO_MAX_NAME_SIZE: usize = 32;
pub const GPIO_LINE_NUM_ATTRS_MAX: usize = 10;

bitflags! {
    /// Line request flags
    ///
    /// Maps to kernel [`GPIO_V2_LINE_FLAG_*`] flags. Only the subset needed to
    /// drive and sample a line is exposed.
    ///
    /// [`GPIO_V2_LINE_FLAG_*`]: https://github.com/torvalds/linux/blob/v5.19/include/uapi/linux/gpio.h
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct LineFlags: u64 {
        const USED = (1 << 0);
        const ACTIVE_LOW = (1 << 1);
        const INPUT = (1 << 2);
        const OUTPUT = (1 << 3);
        const BIAS_DISABLED = (1 << 10);
    }
}

bitflags! {
    /// Attribute IDs
    ///
    /// Maps to kernel [`GPIO_V2_LINE_ATTR_ID_*`] flags.
    ///
    /// [`GPIO_V2_LINE_ATTR_ID_*`]: https://github.com/torvalds/linux/blob/v5.19/include/uapi/linux/gpio.h
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LineAttrId: u32 {
        const FLAGS = 1;
        const OUTPUT_VALUES = 2;
        const DEBOUNCE = 3;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub(crate) struct gpio_line_values {
    pub(crate) bits: u64,
    pub(crate) mask: u64,
}

/// a configurable attribute of a line
#[derive(Clone, Copy)]
#[repr(C)]
pub(crate) struct gpio_line_attribute {
    pub(crate) id: LineAttrId,
    /// reserved for future use and must be zero filled
    pub(crate) _padding: u32,
    /// A tagged union when combined with `id`
    pub(crate) attribute: gpio_line_attribute_union,
}

impl gpio_line_attribute {
    /// Initial output levels, one bit per requested line
    pub(crate) const fn output_values(values: u64) -> Self {
        Self {
            id: LineAttrId::OUTPUT_VALUES,
            _padding: 0,
            attribute: gpio_line_attribute_union { values },
        }
    }
}

impl core::fmt::Debug for gpio_line_attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // SAFETY: `id` tags which union member the kernel (or we) wrote
        let value = unsafe {
            match self.id {
                LineAttrId::FLAGS => &self.attribute.flags as &dyn core::fmt::Debug,
                LineAttrId::OUTPUT_VALUES => &self.attribute.values as &dyn core::fmt::Debug,
                LineAttrId::DEBOUNCE => &self.attribute.debounce_period as &dyn core::fmt::Debug,
                _ => &"unknown line attribute" as &dyn core::fmt::Debug,
            }
        };
        f.debug_struct("gpio_line_attribute")
            .field("id", &self.id)
            .field("attribute", value)
            .finish()
    }
}

#[derive(Clone, Copy)]
#[repr(C)]
pub(crate) union gpio_line_attribute_union {
    pub(crate) flags: LineFlags,
    pub(crate) values: u64,
    /// debounce period in microseconds
    pub(crate) debounce_period: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct gpio_line_config_attribute {
    pub(crate) attr: gpio_line_attribute,
    /// lines the attribute applies to, indexed like `gpio_line_request.offsets`
    pub(crate) mask: u64,
}

impl gpio_line_config_attribute {
    const EMPTY: Self = Self {
        attr: gpio_line_attribute {
            id: LineAttrId::empty(),
            _padding: 0,
            attribute: gpio_line_attribute_union { values: 0 },
        },
        mask: 0,
    };
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct gpio_line_config {
    pub(crate) flags: LineFlags,
    pub(crate) num_attrs: u32,
    _padding: [u32; 5],
    pub(crate) attrs: [gpio_line_config_attribute; GPIO_LINE_NUM_ATTRS_MAX],
}

impl gpio_line_config {
    pub const fn zeroed() -> Self {
        Self {
            flags: LineFlags::empty(),
            num_attrs: 0,
            _padding: [0; 5],
            attrs: [gpio_line_config_attribute::EMPTY; GPIO_LINE_NUM_ATTRS_MAX],
        }
    }

    pub(crate) fn push_attr(&mut self, attr: gpio_line_attribute, mask: u64) -> bool {
        let Some(slot) = self.attrs.get_mut(self.num_attrs as usize) else {
            return false;
        };
        *slot = gpio_line_config_attribute { attr, mask };
        self.num_attrs += 1;
        true
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct gpio_line_request {
    pub(crate) offsets: [u32; GPIO_LINES_MAX],
    pub(crate) consumer: [u8; GPIO_MAX_NAME_SIZE],
    pub(crate) config: gpio_line_config,
    pub(crate) num_lines: u32,
    pub(crate) event_buffer_size: u32,
    _padding: [u32; 5],
    pub(crate) fd: std::os::fd::RawFd,
}

impl gpio_line_request {
    pub const fn zeroed() -> Self {
        Self {
            offsets: [0; GPIO_LINES_MAX],
            consumer: [0; GPIO_MAX_NAME_SIZE],
            config: gpio_line_config::zeroed(),
            num_lines: 0,
            event_buffer_size: 0,
            _padding: [0; 5],
            fd: 0,
        }
    }
}

ioctl_readwrite!(gpio_get_line, 0xB4, 0x07, gpio_line_request);

ioctl_readwrite!(gpio_line_get_values, 0xB4, 0x0E, gpio_line_values);
ioctl_readwrite!(gpio_line_set_values, 0xB4, 0x0F, gpio_line_values);
