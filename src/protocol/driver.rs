//! Protocol driver
//!
//! Every transaction starts and ends with CLOCK low and DATA as an input.
//! Commands are only latched by the rising edge of [`MacDriver::pulse`], so
//! the command lines are always settled before the clock moves.

use super::bus::PinGuard;
use super::{lsb_first, pack_operands, shift_in_msb_first, Command, PinMap, PinRole, WORD_BITS};
use crate::gpio::{Gpio, GpioError, Level, PinMode};
use std::fmt;
use std::time::Duration;

/// Settle delay before, between and after clock edges
pub const DEFAULT_SETTLE: Duration = Duration::from_micros(200);

/// Host-side copy of what the peer registers should hold.
///
/// Only for display and comparison; the peer is authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Shadow {
    pub a: u16,
    pub b: u16,
    pub c: u32,
}

impl Shadow {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn load(&mut self, a: u16, b: u16) {
        self.a = a;
        self.b = b;
    }

    /// `c += a * b`, wrapping at 32 bits like the peer accumulator
    pub fn accumulate(&mut self) {
        self.c = self.c.wrapping_add(self.a as u32 * self.b as u32);
    }
}

impl fmt::Display for Shadow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "REF a: {} ({:04x}), b: {} ({:04x}), c: {} ({:08x})",
            self.a, self.a, self.b, self.b, self.c, self.c
        )
    }
}

/// Driver for the multiply-accumulate peer.
///
/// Owns the pins through a [`PinGuard`], so dropping the driver releases
/// the bus.
pub struct MacDriver<G: Gpio> {
    bus: PinGuard<G>,
    settle: Duration,
    shadow: Shadow,
    pulses: u64,
    transactions: u64,
}

impl<G: Gpio> MacDriver<G> {
    /// Acquire the pins and bring peer and shadow to a known zero state
    /// with one reset.
    pub fn new(gpio: G, pins: PinMap, settle: Duration) -> Result<Self, GpioError> {
        let bus = PinGuard::acquire(gpio, pins)?;
        let mut driver = Self {
            bus,
            settle,
            shadow: Shadow::default(),
            pulses: 0,
            transactions: 0,
        };
        driver.reset()?;
        Ok(driver)
    }

    /// One clock cycle: wait, rise, wait, fall, wait.
    ///
    /// CLOCK must be low on entry; it is low on return.
    pub fn pulse(&mut self) -> Result<(), GpioError> {
        self.bus.delay(self.settle);
        self.bus.write(PinRole::Clock, Level::High)?;
        self.bus.delay(self.settle);
        self.bus.write(PinRole::Clock, Level::Low)?;
        self.bus.delay(self.settle);
        self.pulses += 1;
        log::trace!("clock pulse #{}", self.pulses);
        Ok(())
    }

    fn select(&mut self, cmd: Command) -> Result<(), GpioError> {
        let (cmd1, cmd0) = cmd.lines();
        self.bus.write(PinRole::Cmd1, cmd1)?;
        self.bus.write(PinRole::Cmd0, cmd0)?;
        Ok(())
    }

    /// Clear `a`, `b` and `c`. Idempotent.
    pub fn reset(&mut self) -> Result<(), GpioError> {
        self.select(Command::Idle)?;
        self.pulse()?;
        self.shadow.clear();
        self.finish("reset");
        Ok(())
    }

    /// Load `a` and `b`: the word `(a << 16) | b` is shifted out LSB first,
    /// one clock per bit.
    ///
    /// The write command stays selected on return; the next transaction
    /// selects its own command.
    pub fn write(&mut self, a: u16, b: u16) -> Result<(), GpioError> {
        self.select(Command::Write)?;
        self.bus.delay(self.settle);
        self.bus.set_mode(PinRole::Data, PinMode::Output)?;

        let word = pack_operands(a, b);
        for bit in lsb_first(word) {
            self.bus.write(PinRole::Data, bit)?;
            self.pulse()?;
        }
        self.bus.set_mode(PinRole::Data, PinMode::Input)?;

        self.shadow.load(a, b);
        log::debug!("wrote a={} b={} (word {:#010x})", a, b, word);
        self.finish("write");
        Ok(())
    }

    /// `c += a * b` on the peer: a single clock with the sum command.
    pub fn sum(&mut self) -> Result<(), GpioError> {
        self.select(Command::Sum)?;
        self.pulse()?;
        self.shadow.accumulate();
        self.finish("sum");
        Ok(())
    }

    /// Shift `c` out of the peer, MSB first.
    ///
    /// The peer presents each bit before the edge that advances it, so DATA
    /// is sampled before every pulse. The shadow is not touched.
    pub fn read(&mut self) -> Result<u32, GpioError> {
        self.bus.set_mode(PinRole::Data, PinMode::Input)?;
        self.bus.delay(self.settle);
        self.select(Command::Read)?;

        let mut value = 0u32;
        for _ in 0..WORD_BITS {
            let bit = self.bus.read(PinRole::Data)?;
            value = shift_in_msb_first(value, bit);
            self.pulse()?;
        }

        // stop the peer driving DATA
        self.select(Command::Idle)?;

        if value == self.shadow.c {
            log::debug!("read c={} ({:#010x}), matches shadow", value, value);
        } else {
            log::debug!(
                "read c={} ({:#010x}), shadow has {} ({:#010x})",
                value,
                value,
                self.shadow.c,
                self.shadow.c
            );
        }
        self.finish("read");
        Ok(value)
    }

    fn finish(&mut self, operation: &str) {
        self.transactions += 1;
        log::debug!(
            "{} done ({} transactions, {} pulses total)",
            operation,
            self.transactions,
            self.pulses
        );
    }

    /// Return every pin to input. Also happens on drop.
    pub fn release(&mut self) -> Result<(), GpioError> {
        self.bus.release()
    }

    pub fn shadow(&self) -> &Shadow {
        &self.shadow
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    pub fn pins(&self) -> &PinMap {
        self.bus.pins()
    }

    /// Clock pulses issued since construction
    pub fn pulses(&self) -> u64 {
        self.pulses
    }

    /// Completed transactions since construction (including the initial reset)
    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    pub fn gpio(&self) -> &G {
        self.bus.gpio()
    }

    pub fn gpio_mut(&mut self) -> &mut G {
        self.bus.gpio_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{SimEvent, SimGpio};

    fn make_driver() -> MacDriver<SimGpio> {
        let pins = PinMap::default();
        MacDriver::new(SimGpio::recording(pins), pins, DEFAULT_SETTLE).unwrap()
    }

    fn assert_idle(driver: &MacDriver<SimGpio>) {
        let pins = *driver.pins();
        let sim = driver.gpio();
        assert_eq!(sim.level(pins.clock), Level::Low, "clock must end low");
        assert_eq!(sim.mode(pins.data), Some(PinMode::Input), "data must end as input");
    }

    #[test]
    fn test_new_performs_initial_reset() {
        let driver = make_driver();
        assert_eq!(driver.gpio().rising_edges(), 1);
        assert_eq!(driver.transactions(), 1);
        assert_eq!(*driver.shadow(), Shadow::default());
        assert_idle(&driver);
    }

    #[test]
    fn test_pulse_sequence() {
        let mut driver = make_driver();
        let clock = driver.pins().clock;
        driver.gpio_mut().clear_events();
        driver.pulse().unwrap();

        assert_eq!(
            driver.gpio().events(),
            &[
                SimEvent::Delay(DEFAULT_SETTLE),
                SimEvent::Write { pin: clock, level: Level::High },
                SimEvent::Delay(DEFAULT_SETTLE),
                SimEvent::Write { pin: clock, level: Level::Low },
                SimEvent::Delay(DEFAULT_SETTLE),
            ]
        );
    }

    #[test]
    fn test_pulse_counts_per_operation() {
        let mut driver = make_driver();
        let edges = |d: &MacDriver<SimGpio>| d.gpio().rising_edges();

        let before = edges(&driver);
        driver.reset().unwrap();
        assert_eq!(edges(&driver) - before, 1);

        let before = edges(&driver);
        driver.write(1, 2).unwrap();
        assert_eq!(edges(&driver) - before, 32);

        let before = edges(&driver);
        driver.sum().unwrap();
        assert_eq!(edges(&driver) - before, 1);

        let before = edges(&driver);
        driver.read().unwrap();
        assert_eq!(edges(&driver) - before, 32);

        assert_eq!(driver.pulses(), driver.gpio().rising_edges());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut driver = make_driver();
        driver.write(5, 6).unwrap();
        driver.sum().unwrap();

        driver.reset().unwrap();
        let once = *driver.shadow();
        driver.reset().unwrap();
        assert_eq!(*driver.shadow(), once);
        assert_eq!(once, Shadow { a: 0, b: 0, c: 0 });
        assert_eq!(driver.gpio().peer().c, 0);
    }

    #[test]
    fn test_sum_accumulates() {
        let mut driver = make_driver();
        driver.write(3, 4).unwrap();
        driver.sum().unwrap();
        assert_eq!(driver.shadow().c, 12);
        driver.sum().unwrap();
        assert_eq!(driver.shadow().c, 24);
    }

    #[test]
    fn test_sum_wraps() {
        let mut shadow = Shadow {
            a: 0xFFFF,
            b: 0xFFFF,
            c: 0xFFFF_FFF0,
        };
        shadow.accumulate();
        let expected = (0xFFFF_FFF0u64 + 0xFFFFu64 * 0xFFFF) % (1 << 32);
        assert_eq!(shadow.c as u64, expected);

        let mut driver = make_driver();
        driver.write(0xFFFF, 0xFFFF).unwrap();
        for _ in 0..3 {
            driver.sum().unwrap();
        }
        let expected = (3 * 0xFFFFu64 * 0xFFFF) % (1 << 32);
        assert_eq!(driver.shadow().c as u64, expected);
        assert_eq!(driver.read().unwrap() as u64, expected);
    }

    #[test]
    fn test_write_bit_order() {
        let mut driver = make_driver();
        let pins = *driver.pins();
        driver.gpio_mut().clear_events();
        driver.write(0x8000, 0x0001).unwrap();

        let data_bits: Vec<Level> = driver
            .gpio()
            .events()
            .iter()
            .filter_map(|e| match e {
                SimEvent::Write { pin, level } if *pin == pins.data => Some(*level),
                _ => None,
            })
            .collect();
        assert_eq!(data_bits.len(), 32);
        assert_eq!(data_bits[0], Level::High, "bit 0 of b goes first");
        assert_eq!(data_bits[31], Level::High, "bit 15 of a goes last");
        assert!(data_bits[1..31].iter().all(|b| *b == Level::Low));
    }

    #[test]
    fn test_write_round_trip_through_peer() {
        let mut driver = make_driver();
        for (a, b) in [(0u16, 0u16), (1, 0), (0, 1), (0x1234, 0xABCD), (0xFFFF, 0xFFFF)] {
            driver.write(a, b).unwrap();
            let peer = driver.gpio().peer();
            assert_eq!(peer.shift, pack_operands(a, b));
            assert_eq!((peer.a, peer.b), (a, b));
            assert_eq!((driver.shadow().a, driver.shadow().b), (a, b));
        }
    }

    #[test]
    fn test_write_leaves_write_command_selected() {
        let mut driver = make_driver();
        driver.write(7, 8).unwrap();
        assert_eq!(driver.gpio().command(), Command::Write);
        assert_idle(&driver);
    }

    #[test]
    fn test_read_returns_to_idle() {
        let mut driver = make_driver();
        driver.read().unwrap();
        assert_eq!(driver.gpio().command(), Command::Idle);
        assert_eq!(driver.gpio().peer().data_out(), None);
        assert_idle(&driver);
    }

    #[test]
    fn test_read_bit_order() {
        let mut driver = make_driver();
        for pattern in [0x0000_0001u32, 0x8000_0000, 0xA5A5_A5A5, 0x1234_5678, u32::MAX] {
            driver.gpio_mut().peer_mut().c = pattern;
            assert_eq!(driver.read().unwrap(), pattern, "pattern {pattern:#010x}");
        }
    }

    #[test]
    fn test_read_samples_before_pulse() {
        let mut driver = make_driver();
        let pins = *driver.pins();
        driver.gpio_mut().clear_events();
        driver.read().unwrap();

        let events = driver.gpio().events();
        let first_read = events
            .iter()
            .position(|e| matches!(e, SimEvent::Read { pin, .. } if *pin == pins.data))
            .unwrap();
        let first_rise = events
            .iter()
            .position(|e| {
                matches!(e, SimEvent::Write { pin, level: Level::High } if *pin == pins.clock)
            })
            .unwrap();
        assert!(first_read < first_rise);
    }

    #[test]
    fn test_read_does_not_touch_shadow() {
        let mut driver = make_driver();
        driver.write(2, 3).unwrap();
        driver.sum().unwrap();
        driver.gpio_mut().peer_mut().c = 999;

        let before = *driver.shadow();
        assert_eq!(driver.read().unwrap(), 999);
        assert_eq!(*driver.shadow(), before);
    }

    #[test]
    fn test_device_value_independent_of_shadow() {
        let mut driver = make_driver();
        driver.write(100, 200).unwrap();
        driver.sum().unwrap();
        assert_eq!(driver.read().unwrap(), driver.gpio().peer().c);
        assert_eq!(driver.gpio().peer().c, 20_000);
    }

    #[test]
    fn test_every_operation_ends_idle_without_contention() {
        let mut driver = make_driver();
        type Op = fn(&mut MacDriver<SimGpio>) -> Result<(), GpioError>;
        let ops: [Op; 4] = [
            |d| d.reset(),
            |d| d.write(0xBEEF, 0x0042),
            |d| d.sum(),
            |d| d.read().map(|_| ()),
        ];

        for first in ops {
            for second in ops {
                first(&mut driver).unwrap();
                assert_idle(&driver);
                second(&mut driver).unwrap();
                assert_idle(&driver);
            }
        }
        assert_eq!(driver.gpio().contention(), 0);
    }

    #[test]
    fn test_each_pulse_waits_three_times() {
        let mut driver = make_driver();
        driver.gpio_mut().clear_events();
        driver.sum().unwrap();
        let delays = driver
            .gpio()
            .events()
            .iter()
            .filter(|e| matches!(e, SimEvent::Delay(_)))
            .count();
        assert_eq!(delays, 3);
    }

    #[test]
    fn test_configurable_settle() {
        let pins = PinMap::default();
        let settle = Duration::from_micros(50);
        let mut driver = MacDriver::new(SimGpio::recording(pins), pins, settle).unwrap();
        let before = driver.gpio().elapsed();
        driver.sum().unwrap();
        assert_eq!(driver.gpio().elapsed() - before, settle * 3);
        assert_eq!(driver.settle(), settle);
    }

    #[test]
    fn test_gpio_failure_is_reported() {
        let mut driver = make_driver();
        let clock = driver.pins().clock;
        driver.gpio_mut().fail_writes_to(Some(clock));
        assert!(matches!(
            driver.sum(),
            Err(GpioError::Rejected { pin, .. }) if pin == clock
        ));
    }

    #[test]
    fn test_release_restores_inputs() {
        let mut driver = make_driver();
        driver.write(1, 1).unwrap();
        driver.release().unwrap();
        let pins = *driver.pins();
        for (_, pin) in pins.roles() {
            assert_eq!(driver.gpio().mode(pin), Some(PinMode::Input));
        }
    }

    #[test]
    fn test_shadow_display() {
        let shadow = Shadow {
            a: 3,
            b: 4,
            c: 12,
        };
        assert_eq!(
            shadow.to_string(),
            "REF a: 3 (0003), b: 4 (0004), c: 12 (0000000c)"
        );
    }
}
