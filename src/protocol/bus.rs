//! Scoped ownership of the protocol pins
//!
//! `PinGuard` configures the four lines on acquisition and returns every one
//! of them to input mode when released or dropped, so the host never leaves
//! a driver engaged on the shared wire after it exits, whichever way it
//! exits.

use super::{PinMap, PinRole};
use crate::gpio::{Gpio, GpioError, Level, PinMode, Pull};
use std::time::Duration;

pub struct PinGuard<G: Gpio> {
    gpio: G,
    pins: PinMap,
    released: bool,
}

impl<G: Gpio> PinGuard<G> {
    /// Take ownership of the pins: CLOCK/CMD1/CMD0 become outputs driven
    /// low, DATA becomes an input, all pulls off.
    ///
    /// On failure the pins already touched are reverted before returning.
    pub fn acquire(gpio: G, pins: PinMap) -> Result<Self, GpioError> {
        let mut guard = Self {
            gpio,
            pins,
            released: false,
        };
        guard.configure()?;
        log::info!(
            "acquired pins clock={} cmd1={} cmd0={} data={}",
            pins.clock,
            pins.cmd1,
            pins.cmd0,
            pins.data
        );
        Ok(guard)
    }

    fn configure(&mut self) -> Result<(), GpioError> {
        for pin in self.pins.outputs() {
            self.gpio.set_mode(pin, PinMode::Output)?;
            self.gpio.set_pull(pin, Pull::Off)?;
        }
        self.gpio.set_mode(self.pins.data, PinMode::Input)?;
        self.gpio.set_pull(self.pins.data, Pull::Off)?;

        // CLOCK first: every command assumes it is already low
        self.gpio.write(self.pins.clock, Level::Low)?;
        // idle command keeps the peer off DATA
        self.gpio.write(self.pins.cmd1, Level::Low)?;
        self.gpio.write(self.pins.cmd0, Level::Low)?;
        Ok(())
    }

    /// Return every protocol pin to input mode.
    ///
    /// Idempotent; every pin is attempted even if an earlier one fails, and
    /// the first failure is reported.
    pub fn release(&mut self) -> Result<(), GpioError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_error = None;
        for (role, pin) in self.pins.roles() {
            if let Err(e) = self.gpio.set_mode(pin, PinMode::Input) {
                log::warn!("failed to return {} (GPIO {}) to input: {}", role, pin, e);
                first_error.get_or_insert(e);
            }
        }
        log::info!("released protocol pins");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn pins(&self) -> &PinMap {
        &self.pins
    }

    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    pub fn gpio_mut(&mut self) -> &mut G {
        &mut self.gpio
    }

    pub fn write(&mut self, role: PinRole, level: Level) -> Result<(), GpioError> {
        self.gpio.write(self.pins.pin(role), level)
    }

    pub fn read(&mut self, role: PinRole) -> Result<Level, GpioError> {
        self.gpio.read(self.pins.pin(role))
    }

    pub fn set_mode(&mut self, role: PinRole, mode: PinMode) -> Result<(), GpioError> {
        self.gpio.set_mode(self.pins.pin(role), mode)
    }

    pub fn delay(&mut self, duration: Duration) {
        self.gpio.delay(duration)
    }
}

impl<G: Gpio> Drop for PinGuard<G> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release() {
                log::warn!("pin cleanup on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::SimGpio;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_acquire_sets_idle_state() {
        let pins = PinMap::default();
        let guard = PinGuard::acquire(SimGpio::new(pins), pins).unwrap();
        let sim = guard.gpio();

        for pin in pins.outputs() {
            assert_eq!(sim.mode(pin), Some(PinMode::Output));
            assert_eq!(sim.pull(pin), Some(Pull::Off));
            assert_eq!(sim.level(pin), Level::Low);
        }
        assert_eq!(sim.mode(pins.data), Some(PinMode::Input));
        assert_eq!(sim.pull(pins.data), Some(Pull::Off));
    }

    #[test]
    fn test_release_returns_all_pins_to_input() {
        let pins = PinMap::default();
        let mut guard = PinGuard::acquire(SimGpio::recording(pins), pins).unwrap();
        guard.release().unwrap();
        assert!(guard.is_released());

        for (_, pin) in pins.roles() {
            assert_eq!(guard.gpio().mode(pin), Some(PinMode::Input));
        }

        // second release is a no-op
        guard.gpio_mut().clear_events();
        guard.release().unwrap();
        assert!(guard.gpio().events().is_empty());
    }

    /// Backend that shares its mode table so the test can inspect it after
    /// the guard has been dropped.
    struct SharedModes(Rc<RefCell<Vec<(u8, PinMode)>>>);

    impl Gpio for SharedModes {
        fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), GpioError> {
            self.0.borrow_mut().push((pin, mode));
            Ok(())
        }
        fn set_pull(&mut self, _pin: u8, _pull: Pull) -> Result<(), GpioError> {
            Ok(())
        }
        fn write(&mut self, _pin: u8, _level: Level) -> Result<(), GpioError> {
            Ok(())
        }
        fn read(&mut self, _pin: u8) -> Result<Level, GpioError> {
            Ok(Level::Low)
        }
        fn delay(&mut self, _duration: Duration) {}
    }

    #[test]
    fn test_drop_releases_pins() {
        let pins = PinMap::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let _guard = PinGuard::acquire(SharedModes(Rc::clone(&log)), pins).unwrap();
        }
        let modes = log.borrow();
        let tail = &modes[modes.len() - 4..];
        for (_, pin) in pins.roles() {
            assert!(tail.contains(&(pin, PinMode::Input)));
        }
    }

    /// Backend that rejects output mode on one pin.
    struct RejectOutput {
        bad_pin: u8,
        modes: Rc<RefCell<Vec<(u8, PinMode)>>>,
    }

    impl Gpio for RejectOutput {
        fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), GpioError> {
            if pin == self.bad_pin && mode == PinMode::Output {
                return Err(GpioError::Rejected {
                    pin,
                    operation: "set mode",
                });
            }
            self.modes.borrow_mut().push((pin, mode));
            Ok(())
        }
        fn set_pull(&mut self, _pin: u8, _pull: Pull) -> Result<(), GpioError> {
            Ok(())
        }
        fn write(&mut self, _pin: u8, _level: Level) -> Result<(), GpioError> {
            Ok(())
        }
        fn read(&mut self, _pin: u8) -> Result<Level, GpioError> {
            Ok(Level::Low)
        }
        fn delay(&mut self, _duration: Duration) {}
    }

    #[test]
    fn test_failed_acquire_reverts_outputs() {
        let pins = PinMap::default();
        let modes = Rc::new(RefCell::new(Vec::new()));
        let gpio = RejectOutput {
            bad_pin: pins.cmd0,
            modes: Rc::clone(&modes),
        };

        let result = PinGuard::acquire(gpio, pins);
        assert!(matches!(result, Err(GpioError::Rejected { pin, .. }) if pin == pins.cmd0));

        // clock and cmd1 were made outputs, then put back to input
        let modes = modes.borrow();
        assert!(modes.contains(&(pins.clock, PinMode::Output)));
        assert_eq!(
            modes.iter().rev().find(|(p, _)| *p == pins.clock),
            Some(&(pins.clock, PinMode::Input))
        );
        assert_eq!(
            modes.iter().rev().find(|(p, _)| *p == pins.cmd1),
            Some(&(pins.cmd1, PinMode::Input))
        );
    }
}
