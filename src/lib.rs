//! mac-command
//!
//! Host-side driver for the `mac_fpga` multiply-accumulate peer: two 16-bit
//! input registers `a` and `b` and a 32-bit accumulator `c`, reached through
//! a bit-serial protocol on four GPIO lines.
//!
//! # Architecture
//!
//! ```text
//!   stdin / script
//!        │
//!        ▼
//! ┌─────────────┐
//! │    Shell    │  reset | write a b | sum | read | help | quit
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐
//! │  MacDriver  │  clock sequencer, bit order, shadow registers
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐
//! │  PinGuard   │  pin ownership, restores inputs on drop
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐
//! │ Gpio (trait)│──► BcmGpio (/dev/gpiomem) | SimGpio (peer model)
//! └─────────────┘
//! ```
//!
//! # Wire protocol
//!
//! | Line  | Direction | Idle  |
//! |-------|-----------|-------|
//! | CLOCK | out       | low   |
//! | CMD1  | out       | low   |
//! | CMD0  | out       | low   |
//! | DATA  | in / out  | input |
//!
//! Commands `(CMD1, CMD0)` latch on the rising CLOCK edge: `00` reset,
//! `01` write, `10` sum, `11` read. Writes shift the word `(a << 16) | b`
//! out LSB first; reads shift `c` in MSB first.

pub mod config;
pub mod gpio;
pub mod protocol;
pub mod shell;

pub use config::Config;
pub use gpio::{Gpio, GpioError, Level, PinMode, Pull, Soc};
pub use protocol::{Command, MacDriver, PinGuard, PinMap, Shadow};
pub use shell::{Flow, Shell, ShellCommand};
