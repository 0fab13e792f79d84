//! Simulated GPIO with a behavioral model of the FPGA peer
//!
//! `SimGpio` keeps a mode/pull/latch table per pin and wires the protocol
//! lines to an [`AccumulatorModel`] that reacts to rising CLOCK edges the
//! way the `mac_fpga` design does. Every call is recorded as a
//! [`SimEvent`] so tests can check exact pin sequences.

use super::{check_pin, Gpio, GpioError, Level, PinMode, Pull};
use crate::protocol::{unpack_operands, Command, PinMap};
use std::collections::HashMap;
use std::time::Duration;

/// Peer register file: `a`, `b` loaded by write, `c += a * b` on sum,
/// `c` shifted out MSB first on read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatorModel {
    pub a: u16,
    pub b: u16,
    pub c: u32,
    /// Operand shift register, filled from the top so that after 32 LSB-first
    /// bits it holds the transmitted word.
    pub shift: u32,
    /// Output shift register while the read command is selected
    readout: Option<u32>,
}

impl AccumulatorModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rising CLOCK edge with `cmd` selected and `data` on the wire
    pub fn clock(&mut self, cmd: Command, data: Level) {
        match cmd {
            Command::Idle => {
                self.a = 0;
                self.b = 0;
                self.c = 0;
            }
            Command::Write => {
                self.shift = (self.shift >> 1) | (data.bit() << 31);
                let (a, b) = unpack_operands(self.shift);
                self.a = a;
                self.b = b;
            }
            Command::Sum => {
                self.c = self.c.wrapping_add(self.a as u32 * self.b as u32);
            }
            Command::Read => {
                let current = self.readout.unwrap_or(self.c);
                self.readout = Some(current << 1);
            }
        }
    }

    /// Command lines changed (no clock edge)
    pub fn select(&mut self, cmd: Command) {
        if cmd == Command::Read {
            self.readout.get_or_insert(self.c);
        } else {
            self.readout = None;
        }
    }

    /// Level the peer drives on DATA, if it drives it at all
    pub fn data_out(&self) -> Option<Level> {
        self.readout
            .map(|value| Level::from(value & 0x8000_0000 != 0))
    }
}

/// Recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Mode { pin: u8, mode: PinMode },
    Pull { pin: u8, pull: Pull },
    Write { pin: u8, level: Level },
    Read { pin: u8, level: Level },
    Delay(Duration),
}

pub struct SimGpio {
    pins: PinMap,
    modes: HashMap<u8, PinMode>,
    pulls: HashMap<u8, Pull>,
    latches: HashMap<u8, Level>,
    peer: AccumulatorModel,
    events: Option<Vec<SimEvent>>,
    rising_edges: u64,
    contention: u64,
    elapsed: Duration,
    fail_writes_to: Option<u8>,
}

impl SimGpio {
    pub fn new(pins: PinMap) -> Self {
        Self {
            pins,
            modes: HashMap::new(),
            pulls: HashMap::new(),
            latches: HashMap::new(),
            peer: AccumulatorModel::new(),
            events: None,
            rising_edges: 0,
            contention: 0,
            elapsed: Duration::ZERO,
            fail_writes_to: None,
        }
    }

    /// Like [`SimGpio::new`], but every backend call is kept in
    /// [`SimGpio::events`]
    pub fn recording(pins: PinMap) -> Self {
        Self {
            events: Some(Vec::new()),
            ..Self::new(pins)
        }
    }

    pub fn mode(&self, pin: u8) -> Option<PinMode> {
        self.modes.get(&pin).copied()
    }

    pub fn pull(&self, pin: u8) -> Option<Pull> {
        self.pulls.get(&pin).copied()
    }

    /// Output latch of `pin`
    pub fn level(&self, pin: u8) -> Level {
        self.latches.get(&pin).copied().unwrap_or_default()
    }

    /// Command currently presented on CMD1/CMD0
    pub fn command(&self) -> Command {
        Command::from_lines(self.level(self.pins.cmd1), self.level(self.pins.cmd0))
    }

    pub fn peer(&self) -> &AccumulatorModel {
        &self.peer
    }

    pub fn peer_mut(&mut self) -> &mut AccumulatorModel {
        &mut self.peer
    }

    /// Recorded calls; always empty unless built with [`SimGpio::recording`]
    pub fn events(&self) -> &[SimEvent] {
        self.events.as_deref().unwrap_or(&[])
    }

    pub fn clear_events(&mut self) {
        if let Some(ref mut events) = self.events {
            events.clear();
        }
    }

    fn record(&mut self, event: SimEvent) {
        if let Some(ref mut events) = self.events {
            events.push(event);
        }
    }

    /// Rising CLOCK edges seen by the peer
    pub fn rising_edges(&self) -> u64 {
        self.rising_edges
    }

    /// Number of bus changes made while host and peer both drove DATA
    pub fn contention(&self) -> u64 {
        self.contention
    }

    /// Total simulated sleep time
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Make every write to `pin` fail (fault injection)
    pub fn fail_writes_to(&mut self, pin: Option<u8>) {
        self.fail_writes_to = pin;
    }

    fn host_drives_data(&self) -> bool {
        self.mode(self.pins.data) == Some(PinMode::Output)
    }

    fn check_contention(&mut self) {
        if self.host_drives_data() && self.peer.data_out().is_some() {
            self.contention += 1;
        }
    }

    fn data_level(&self) -> Level {
        if self.host_drives_data() {
            self.level(self.pins.data)
        } else {
            // pulls are off; an undriven line reads low
            self.peer.data_out().unwrap_or(Level::Low)
        }
    }
}

impl Gpio for SimGpio {
    fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), GpioError> {
        check_pin(pin)?;
        self.record(SimEvent::Mode { pin, mode });
        self.modes.insert(pin, mode);
        if pin == self.pins.data {
            self.check_contention();
        }
        Ok(())
    }

    fn set_pull(&mut self, pin: u8, pull: Pull) -> Result<(), GpioError> {
        check_pin(pin)?;
        self.record(SimEvent::Pull { pin, pull });
        self.pulls.insert(pin, pull);
        Ok(())
    }

    fn write(&mut self, pin: u8, level: Level) -> Result<(), GpioError> {
        check_pin(pin)?;
        if self.fail_writes_to == Some(pin) {
            return Err(GpioError::Rejected {
                pin,
                operation: "write",
            });
        }
        self.record(SimEvent::Write { pin, level });
        let previous = self.latches.insert(pin, level).unwrap_or_default();

        if pin == self.pins.clock
            && self.mode(pin) == Some(PinMode::Output)
            && previous == Level::Low
            && level == Level::High
        {
            self.rising_edges += 1;
            let cmd = self.command();
            let data = self.data_level();
            self.peer.clock(cmd, data);
        } else if pin == self.pins.cmd1 || pin == self.pins.cmd0 {
            let cmd = self.command();
            self.peer.select(cmd);
            self.check_contention();
        } else if pin == self.pins.data {
            self.check_contention();
        }
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<Level, GpioError> {
        check_pin(pin)?;
        let level = if pin == self.pins.data {
            self.data_level()
        } else {
            self.level(pin)
        };
        self.record(SimEvent::Read { pin, level });
        Ok(level)
    }

    fn delay(&mut self, duration: Duration) {
        self.record(SimEvent::Delay(duration));
        self.elapsed += duration;
    }
}
