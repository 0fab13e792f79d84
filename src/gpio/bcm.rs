//! BCM2711 / BCM2835 GPIO over `/dev/gpiomem`
//!
//! Maps the GPIO register block into the process and drives it directly,
//! the same register interface pigpio uses. `/dev/gpiomem` exposes only
//! the GPIO block, so no root privileges are needed beyond membership in
//! the `gpio` group.
//!
//! | Register              | Offset | Use                         |
//! |-----------------------|--------|-----------------------------|
//! | GPFSEL0..5            | 0x00   | 3-bit function per pin      |
//! | GPSET0/1              | 0x1C   | drive high                  |
//! | GPCLR0/1              | 0x28   | drive low                   |
//! | GPLEV0/1              | 0x34   | pin level                   |
//! | GPPUD / GPPUDCLK0/1   | 0x94   | pull control (BCM2835)      |
//! | GPIO_PUP_PDN_CNTRL0-3 | 0xE4   | pull control (BCM2711)      |

use super::{check_pin, Gpio, GpioError, Level, PinMode, Pull, Soc};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr::{read_volatile, write_volatile};
use std::time::Duration;

/// Default device node for the GPIO register block
pub const GPIOMEM_PATH: &str = "/dev/gpiomem";

/// Size of the mapping (one page covers every GPIO register)
const BLOCK_SIZE: usize = 4096;

/// GPIO register offsets
mod regs {
    pub const GPFSEL0: usize = 0x00;
    pub const GPSET0: usize = 0x1C;
    pub const GPCLR0: usize = 0x28;
    pub const GPLEV0: usize = 0x34;
    pub const GPPUD: usize = 0x94;
    pub const GPPUDCLK0: usize = 0x98;
    pub const GPIO_PUP_PDN_CNTRL_REG0: usize = 0xE4;
}

/// Function select codes
mod func {
    pub const INPUT: u32 = 0b000;
    pub const OUTPUT: u32 = 0b001;
}

/// Settle time for the legacy pull-control clocking sequence
/// (150 core cycles, rounded up generously)
const PUD_SETUP: Duration = Duration::from_micros(5);

/// Memory-mapped GPIO block
pub struct BcmGpio {
    base: *mut u32,
    soc: Soc,
    _file: File,
}

impl BcmGpio {
    /// Map the GPIO registers from `path` (normally [`GPIOMEM_PATH`])
    pub fn open(path: &str, soc: Soc) -> Result<Self, GpioError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|source| GpioError::Open {
                path: path.to_string(),
                source,
            })?;

        // SAFETY: mapping a device file we hold open; the result is checked
        // against MAP_FAILED before use.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                BLOCK_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(GpioError::Map(std::io::Error::last_os_error()));
        }

        log::debug!("mapped {} ({:?}) at {:p}", path, soc, base);

        Ok(Self {
            base: base as *mut u32,
            soc,
            _file: file,
        })
    }

    #[inline]
    fn read_reg(&self, offset: usize) -> u32 {
        debug_assert!(offset < BLOCK_SIZE);
        // SAFETY: offset is a register inside the mapped page
        unsafe { read_volatile(self.base.add(offset / 4)) }
    }

    #[inline]
    fn write_reg(&self, offset: usize, value: u32) {
        debug_assert!(offset < BLOCK_SIZE);
        // SAFETY: offset is a register inside the mapped page
        unsafe { write_volatile(self.base.add(offset / 4), value) }
    }

    fn set_pull_bcm2711(&self, pin: u8, pull: Pull) {
        let reg = regs::GPIO_PUP_PDN_CNTRL_REG0 + 4 * (pin as usize / 16);
        let shift = (pin as u32 % 16) * 2;
        let bits = match pull {
            Pull::Off => 0b00,
            Pull::Up => 0b01,
            Pull::Down => 0b10,
        };
        let mut value = self.read_reg(reg);
        value &= !(0b11 << shift);
        value |= bits << shift;
        self.write_reg(reg, value);
    }

    fn set_pull_bcm2835(&self, pin: u8, pull: Pull) {
        let clk = regs::GPPUDCLK0 + 4 * (pin as usize / 32);
        let bit = 1u32 << (pin % 32);
        let code = match pull {
            Pull::Off => 0b00,
            Pull::Down => 0b01,
            Pull::Up => 0b10,
        };
        self.write_reg(regs::GPPUD, code);
        std::thread::sleep(PUD_SETUP);
        self.write_reg(clk, bit);
        std::thread::sleep(PUD_SETUP);
        self.write_reg(regs::GPPUD, 0);
        self.write_reg(clk, 0);
    }
}

impl Gpio for BcmGpio {
    fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), GpioError> {
        check_pin(pin)?;
        let reg = regs::GPFSEL0 + 4 * (pin as usize / 10);
        let shift = (pin as u32 % 10) * 3;
        let code = match mode {
            PinMode::Input => func::INPUT,
            PinMode::Output => func::OUTPUT,
        };
        let mut value = self.read_reg(reg);
        value &= !(0b111 << shift);
        value |= code << shift;
        self.write_reg(reg, value);

        if (self.read_reg(reg) >> shift) & 0b111 != code {
            return Err(GpioError::Rejected {
                pin,
                operation: "set mode",
            });
        }
        Ok(())
    }

    fn set_pull(&mut self, pin: u8, pull: Pull) -> Result<(), GpioError> {
        check_pin(pin)?;
        match self.soc {
            Soc::Bcm2711 => self.set_pull_bcm2711(pin, pull),
            Soc::Bcm2835 => self.set_pull_bcm2835(pin, pull),
        }
        Ok(())
    }

    fn write(&mut self, pin: u8, level: Level) -> Result<(), GpioError> {
        check_pin(pin)?;
        let bank = 4 * (pin as usize / 32);
        let bit = 1u32 << (pin % 32);
        match level {
            Level::High => self.write_reg(regs::GPSET0 + bank, bit),
            Level::Low => self.write_reg(regs::GPCLR0 + bank, bit),
        }
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<Level, GpioError> {
        check_pin(pin)?;
        let bank = 4 * (pin as usize / 32);
        let value = self.read_reg(regs::GPLEV0 + bank);
        Ok(Level::from(value & (1 << (pin % 32)) != 0))
    }

    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl Drop for BcmGpio {
    fn drop(&mut self) {
        // SAFETY: base/BLOCK_SIZE are exactly what mmap returned in open()
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, BLOCK_SIZE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let err = BcmGpio::open("/nonexistent/gpiomem", Soc::Bcm2711)
            .err()
            .expect("opening a missing device must fail");
        match err {
            GpioError::Open { path, .. } => assert_eq!(path, "/nonexistent/gpiomem"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
