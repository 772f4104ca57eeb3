//! Status notification parsing.
//!
//! Decodes the three observable characteristics: machine status, slider
//! position and capsule counter.

use std::fmt;

use crate::error::{Error, Result};

/// Machine-level flags carried in byte 0 of the status frame.
pub mod machine_flags {
    /// Water tank empty.
    pub const WATER_EMPTY: u8 = 0x01;
    /// Drip tray jammed.
    pub const TRAY_JAMMED: u8 = 0x04;
    /// Capsule mechanism jammed (generic machine error).
    pub const MECHANISM_JAMMED: u8 = 0x10;
    /// Descaling needed.
    pub const DESCALING_NEEDED: u8 = 0x40;
}

/// Brew-level flags carried in byte 1 of the status frame.
pub mod brew_flags {
    /// Low temperature, only meaningful while [`SLEEPING`] is clear.
    pub const LOW_TEMPERATURE: u8 = 0x01;
    /// Machine reports "ok" / ready.
    pub const READY: u8 = 0x02;
    /// Water pump engaged.
    pub const PUMPING: u8 = 0x04;
    /// Combined with [`LOW_TEMPERATURE`] the machine is sleeping.
    pub const SLEEPING: u8 = 0x08;
    /// Tray open or sensor full.
    pub const TRAY_OPEN: u8 = 0x40;
    /// Capsule engaged.
    pub const CAPSULE_ENGAGED: u8 = 0x80;
}

/// Coarse summary of the machine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BrewStatus {
    /// Ready for a command.
    Ready,
    /// Pumping or brewing.
    Busy,
    /// At least one error flag is set.
    Error,
}

/// Decoded machine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MachineStatus {
    /// Byte 0, machine-level flags.
    pub machine: u8,
    /// Byte 1, brew-level flags.
    pub brew: u8,
}

impl MachineStatus {
    /// Minimum size of a status frame.
    pub const MIN_SIZE: usize = 2;

    /// Parse a status notification.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(Error::ShortFrame {
                frame: "machine status",
                expected: Self::MIN_SIZE,
                actual: data.len(),
            });
        }

        Ok(Self {
            machine: data[0],
            brew: data[1],
        })
    }

    fn machine_flag(&self, flag: u8) -> bool {
        self.machine & flag != 0
    }

    fn brew_flag(&self, flag: u8) -> bool {
        self.brew & flag != 0
    }

    /// The water tank is empty.
    pub fn no_water(&self) -> bool {
        self.machine_flag(machine_flags::WATER_EMPTY)
    }

    /// The capsule mechanism is jammed.
    pub fn mechanism_jammed(&self) -> bool {
        self.machine_flag(machine_flags::MECHANISM_JAMMED)
    }

    /// The machine asks for descaling.
    pub fn needs_descaling(&self) -> bool {
        self.machine_flag(machine_flags::DESCALING_NEEDED)
    }

    /// Tray jammed (machine byte) or tray open / full (brew byte).
    pub fn tray_error(&self) -> bool {
        self.machine_flag(machine_flags::TRAY_JAMMED) || self.brew_flag(brew_flags::TRAY_OPEN)
    }

    /// The water pump is running.
    pub fn is_brewing(&self) -> bool {
        self.brew_flag(brew_flags::PUMPING)
    }

    /// Pump running with a capsule engaged, as opposed to pumping water only.
    pub fn capsule_engaged(&self) -> bool {
        self.brew_flag(brew_flags::CAPSULE_ENGAGED)
    }

    /// The machine is asleep.
    pub fn is_sleeping(&self) -> bool {
        let mask = brew_flags::SLEEPING | brew_flags::LOW_TEMPERATURE;
        self.brew & mask == mask
    }

    /// The machine is not yet at temperature.
    pub fn low_temperature(&self) -> bool {
        let mask = brew_flags::SLEEPING | brew_flags::LOW_TEMPERATURE;
        self.brew & mask == brew_flags::LOW_TEMPERATURE
    }

    /// The machine reports "ok" and no blocking machine error is set.
    pub fn is_ok(&self) -> bool {
        self.brew_flag(brew_flags::READY) && !self.no_water() && !self.mechanism_jammed()
    }

    /// A brew command would be accepted.
    pub fn ready_to_brew(&self) -> bool {
        self.is_ok() && !self.tray_error() && !self.is_brewing()
    }

    /// Coarse summary.
    pub fn status(&self) -> BrewStatus {
        if !self.error_messages().is_empty() {
            BrewStatus::Error
        } else if self.is_brewing() {
            BrewStatus::Busy
        } else {
            BrewStatus::Ready
        }
    }

    /// Informational messages for the current flags.
    pub fn status_messages(&self) -> Vec<&'static str> {
        let mut messages = Vec::new();
        if self.is_brewing() {
            messages.push(if self.capsule_engaged() {
                "Brewing"
            } else {
                "Pumping"
            });
        }
        if self.is_sleeping() {
            messages.push("Sleeping");
        }
        if self.brew_flag(brew_flags::READY) {
            messages.push("Ok");
        }
        messages
    }

    /// Error messages for the current flags.
    pub fn error_messages(&self) -> Vec<&'static str> {
        let mut errors = Vec::new();
        if self.no_water() {
            errors.push("Water empty");
        }
        if self.mechanism_jammed() {
            errors.push("Capsule mechanism jammed");
        }
        if self.machine_flag(machine_flags::TRAY_JAMMED) {
            errors.push("Tray jammed");
        }
        if self.brew_flag(brew_flags::TRAY_OPEN) {
            errors.push("Tray open/sensor full");
        }
        if self.low_temperature() {
            errors.push("Low temperature");
        }
        errors
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: [{}] [{}]{}",
            self.status(),
            self.status_messages().join(", "),
            self.error_messages().join(", "),
            if self.needs_descaling() {
                " descaling needed"
            } else {
                ""
            }
        )
    }
}

/// Decoded slider (capsule lever) position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SliderStatus {
    /// The slider is closed.
    pub closed: bool,
}

impl SliderStatus {
    /// Raw value reported for a closed slider.
    pub const CLOSED: u8 = 0x02;

    /// Parse a slider notification.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let first = data.first().ok_or(Error::ShortFrame {
            frame: "slider",
            expected: 1,
            actual: 0,
        })?;

        Ok(Self {
            closed: *first == Self::CLOSED,
        })
    }
}

impl fmt::Display for SliderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slider: {}", if self.closed { "closed" } else { "open" })
    }
}

/// Decoded capsule counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CapsuleCount {
    /// The machine tracks capsule stock.
    pub enabled: bool,
    /// Capsules left, 0 while disabled.
    pub capsules_left: u16,
}

impl CapsuleCount {
    /// Minimum size of a capsule counter frame.
    pub const MIN_SIZE: usize = 2;
    /// Raw value reported while the counter is disabled.
    pub const DISABLED: u16 = 0xFFFF;

    /// Parse a capsule counter notification (big-endian).
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(Error::ShortFrame {
                frame: "capsule count",
                expected: Self::MIN_SIZE,
                actual: data.len(),
            });
        }

        let raw = u16::from_be_bytes([data[0], data[1]]);
        let enabled = raw != Self::DISABLED;

        Ok(Self {
            enabled,
            capsules_left: if enabled { raw } else { 0 },
        })
    }

    /// Stock level in percent of the configured maximum.
    ///
    /// A maximum of 0 means no stock tracking and always reads 100.
    pub fn level_percent(&self, max_capsules: u16) -> u8 {
        if max_capsules == 0 {
            return 100;
        }
        let left = u32::from(self.capsules_left);
        let max = u32::from(max_capsules).max(left);
        (left * 100 / max).min(100) as u8
    }

    /// Stock below 10 % of the configured maximum.
    pub fn is_low(&self, max_capsules: u16) -> bool {
        self.level_percent(max_capsules) < 10
    }

    /// No capsules left.
    pub fn is_empty(&self) -> bool {
        self.capsules_left == 0
    }
}

impl fmt::Display for CapsuleCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Capsule counter: {} capsules left: {}",
            if self.enabled { "enabled" } else { "disabled" },
            self.capsules_left
        )
    }
}
