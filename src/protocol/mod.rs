//! mac_fpga wire protocol
//!
//! Four lines, all owned by the host except DATA while the peer answers a
//! read:
//!
//! | Role  | Default GPIO | Direction      |
//! |-------|--------------|----------------|
//! | CLOCK | 21           | output         |
//! | CMD1  | 20           | output         |
//! | CMD0  | 19           | output         |
//! | DATA  | 26           | input / output |
//!
//! The peer latches `(CMD1, CMD0)` and DATA on each rising CLOCK edge.

pub mod bus;
pub mod driver;

pub use bus::PinGuard;
pub use driver::{MacDriver, Shadow, DEFAULT_SETTLE};

use crate::gpio::Level;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of the `a` and `b` registers
pub const REGISTER_BITS: u32 = 16;

/// Bits per write or read transfer
pub const WORD_BITS: u32 = 2 * REGISTER_BITS;

/// Command code carried on `(CMD1, CMD0)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `00`: clear `a`, `b`, `c`; also the bus idle state
    Idle,
    /// `01`: shift a 32-bit operand word in, LSB first
    Write,
    /// `10`: `c += a * b`
    Sum,
    /// `11`: shift `c` out, MSB first
    Read,
}

impl Command {
    /// Line levels as `(CMD1, CMD0)`
    pub fn lines(self) -> (Level, Level) {
        match self {
            Command::Idle => (Level::Low, Level::Low),
            Command::Write => (Level::Low, Level::High),
            Command::Sum => (Level::High, Level::Low),
            Command::Read => (Level::High, Level::High),
        }
    }

    pub fn from_lines(cmd1: Level, cmd0: Level) -> Self {
        match (cmd1, cmd0) {
            (Level::Low, Level::Low) => Command::Idle,
            (Level::Low, Level::High) => Command::Write,
            (Level::High, Level::Low) => Command::Sum,
            (Level::High, Level::High) => Command::Read,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (cmd1, cmd0) = self.lines();
        let name = match self {
            Command::Idle => "idle",
            Command::Write => "write",
            Command::Sum => "sum",
            Command::Read => "read",
        };
        write!(f, "{} ({}{})", name, cmd1, cmd0)
    }
}

/// Protocol line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRole {
    Clock,
    Cmd1,
    Cmd0,
    Data,
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinRole::Clock => write!(f, "clock"),
            PinRole::Cmd1 => write!(f, "cmd1"),
            PinRole::Cmd0 => write!(f, "cmd0"),
            PinRole::Data => write!(f, "data"),
        }
    }
}

/// BCM GPIO numbers for each protocol line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinMap {
    pub clock: u8,
    pub cmd1: u8,
    pub cmd0: u8,
    pub data: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            clock: 21,
            cmd1: 20,
            cmd0: 19,
            data: 26,
        }
    }
}

impl PinMap {
    pub fn pin(&self, role: PinRole) -> u8 {
        match role {
            PinRole::Clock => self.clock,
            PinRole::Cmd1 => self.cmd1,
            PinRole::Cmd0 => self.cmd0,
            PinRole::Data => self.data,
        }
    }

    /// Every role with its pin, outputs first
    pub fn roles(&self) -> [(PinRole, u8); 4] {
        [
            (PinRole::Clock, self.clock),
            (PinRole::Cmd1, self.cmd1),
            (PinRole::Cmd0, self.cmd0),
            (PinRole::Data, self.data),
        ]
    }

    /// Host-driven lines
    pub fn outputs(&self) -> [u8; 3] {
        [self.clock, self.cmd1, self.cmd0]
    }
}

/// Operand word as transmitted: `a` in the high half, `b` in the low half
pub fn pack_operands(a: u16, b: u16) -> u32 {
    ((a as u32) << REGISTER_BITS) | b as u32
}

pub fn unpack_operands(word: u32) -> (u16, u16) {
    ((word >> REGISTER_BITS) as u16, word as u16)
}

/// Transmission order of a write: bit 0 first, bit 31 last
pub fn lsb_first(word: u32) -> impl Iterator<Item = Level> {
    (0..WORD_BITS).map(move |i| Level::from((word >> i) & 1 != 0))
}

/// Assemble a read: each sample shifts in below the previous ones,
/// so the first sample lands in bit 31
pub fn shift_in_msb_first(value: u32, bit: Level) -> u32 {
    (value << 1) | bit.bit()
}
