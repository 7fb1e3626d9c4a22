use nix::ioctl_read;

// struct gpiochip_info
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct gpio_chip_info {
    pub name: [u8; super::v2::GPIO_MAX_NAME_SIZE],
    pub label: [u8; super::v2::GPIO_MAX_NAME_SIZE],
    pub lines: u32,
}

impl gpio_chip_info {
    pub const fn zeroed() -> Self {
        Self {
            name: [0; super::v2::GPIO_MAX_NAME_SIZE],
            label: [0; super::v2::GPIO_MAX_NAME_SIZE],
            lines: 0,
        }
    }
}

ioctl_read!(gpio_get_chipinfo, 0xB4, 0x01, gpio_chip_info);
