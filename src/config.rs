//! Configuration file
//!
//! ```toml
//! [pins]
//! clock = 21
//! cmd1 = 20
//! cmd0 = 19
//! data = 26
//!
//! [timing]
//! settle_us = 200
//!
//! [backend]
//! kind = "gpiomem"
//! device = "/dev/gpiomem"
//! soc = "bcm2711"
//!
//! [shell]
//! show_shadow = false
//! ```
//!
//! Every field is optional; missing ones take the defaults above.

use crate::gpio::{Soc, GPIO_COUNT};
use crate::protocol::{PinMap, PinRole, DEFAULT_SETTLE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("{role} pin {pin} out of range (GPIO 0-{})", GPIO_COUNT - 1)]
    PinOutOfRange { role: PinRole, pin: u8 },
    #[error("GPIO {pin} assigned to both {first} and {second}")]
    DuplicatePin {
        pin: u8,
        first: PinRole,
        second: PinRole,
    },
    #[error("settle delay must be at least 1 microsecond")]
    ZeroDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Memory-mapped BCM GPIO registers
    #[default]
    Gpiomem,
    /// Simulated pins with an in-process peer model
    Sim,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Settle delay around each clock edge, in microseconds
    pub settle_us: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_us: DEFAULT_SETTLE.as_micros() as u64,
        }
    }
}

impl TimingConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_micros(self.settle_us)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Register device for the gpiomem backend
    pub device: String,
    pub soc: Soc,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Gpiomem,
            device: "/dev/gpiomem".to_string(),
            soc: Soc::Bcm2711,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Print the shadow registers after every operation
    pub show_shadow: bool,
    /// Append a timestamped session transcript to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pins: PinMap,
    pub timing: TimingConfig,
    pub backend: BackendConfig,
    pub shell: ShellConfig,
}

impl Config {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML content
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Pins must exist on the GPIO bank and be distinct; the settle delay
    /// must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let roles = self.pins.roles();
        for (i, &(role, pin)) in roles.iter().enumerate() {
            if pin >= GPIO_COUNT {
                return Err(ConfigError::PinOutOfRange { role, pin });
            }
            if let Some(&(first, _)) = roles[..i].iter().find(|(_, p)| *p == pin) {
                return Err(ConfigError::DuplicatePin {
                    pin,
                    first,
                    second: role,
                });
            }
        }

        if self.timing.settle_us == 0 {
            return Err(ConfigError::ZeroDelay);
        }
        Ok(())
    }
}
