//! GPIO capability
//!
//! The protocol driver only needs five primitives from the platform:
//! pin direction, pull resistor, digital write, digital read and a blocking
//! sleep. Backends:
//! - `bcm`: BCM2711/BCM2835 registers mapped from `/dev/gpiomem`
//! - `sim`: in-process pins wired to a model of the FPGA peer

#[cfg(unix)]
pub mod bcm;
pub mod sim;

#[cfg(unix)]
pub use bcm::BcmGpio;
pub use sim::{AccumulatorModel, SimEvent, SimGpio};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Number of GPIO lines on the BCM283x/BCM2711 banks
pub const GPIO_COUNT: u8 = 54;

/// Digital logic level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }

    /// Level as a single bit (0 or 1)
    pub fn bit(self) -> u32 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "0"),
            Level::High => write!(f, "1"),
        }
    }
}

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinMode::Input => write!(f, "input"),
            PinMode::Output => write!(f, "output"),
        }
    }
}

/// Pull resistor configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off,
    Up,
    Down,
}

/// GPIO controller generation; selects the pull-resistor register scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Soc {
    /// Raspberry Pi 4 / 400 / CM4
    #[default]
    Bcm2711,
    /// Raspberry Pi 1-3, Zero
    Bcm2835,
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("invalid GPIO pin {0} (must be below {})", GPIO_COUNT)]
    InvalidPin(u8),
    #[error("failed to open {path}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to map GPIO registers")]
    Map(#[source] std::io::Error),
    #[error("GPIO {pin}: {operation} rejected")]
    Rejected { pin: u8, operation: &'static str },
}

/// Platform GPIO access used by the protocol driver.
///
/// Pins are identified by their BCM GPIO number.
pub trait Gpio {
    fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), GpioError>;
    fn set_pull(&mut self, pin: u8, pull: Pull) -> Result<(), GpioError>;
    fn write(&mut self, pin: u8, level: Level) -> Result<(), GpioError>;
    fn read(&mut self, pin: u8) -> Result<Level, GpioError>;

    /// Block for at least `duration`.
    fn delay(&mut self, duration: Duration);
}

impl Gpio for Box<dyn Gpio> {
    fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), GpioError> {
        (**self).set_mode(pin, mode)
    }
    fn set_pull(&mut self, pin: u8, pull: Pull) -> Result<(), GpioError> {
        (**self).set_pull(pin, pull)
    }
    fn write(&mut self, pin: u8, level: Level) -> Result<(), GpioError> {
        (**self).write(pin, level)
    }
    fn read(&mut self, pin: u8) -> Result<Level, GpioError> {
        (**self).read(pin)
    }
    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration)
    }
}

pub(crate) fn check_pin(pin: u8) -> Result<(), GpioError> {
    if pin < GPIO_COUNT {
        Ok(())
    } else {
        Err(GpioError::InvalidPin(pin))
    }
}
