//! Brew and cancel command frames.
//!
//! Commands are written to the request characteristic and answered by a
//! single frame on the response characteristic.
//!
//! Brew frame layout (10 bytes):
//! - Bytes 0-7: Opcode prefix `03 05 07 04 00 00 00 00`
//! - Byte 8: Temperature, two-digit decimal read as hex (`Low` -> `0x01`)
//! - Byte 9: Beverage, two-digit decimal read as hex (`Americano` -> `0x05`)

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Fixed prefix of every brew command.
pub const BREW_COMMAND_PREFIX: [u8; 8] = [0x03, 0x05, 0x07, 0x04, 0x00, 0x00, 0x00, 0x00];

/// Length of a brew command frame.
pub const BREW_COMMAND_LEN: usize = BREW_COMMAND_PREFIX.len() + 2;

/// The cancel command frame.
pub const CANCEL_COMMAND: [u8; 4] = [0x03, 0x06, 0x01, 0x02];

/// Beverages the machine can brew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CoffeeType {
    /// Ristretto (0x00).
    Ristretto = 0,
    /// Espresso (0x01).
    Espresso = 1,
    /// Lungo (0x02).
    Lungo = 2,
    /// Hot water (0x04).
    Water = 4,
    /// Americano (0x05).
    Americano = 5,
}

impl CoffeeType {
    /// Every beverage, in menu order.
    pub const ALL: [CoffeeType; 5] = [
        Self::Ristretto,
        Self::Espresso,
        Self::Lungo,
        Self::Americano,
        Self::Water,
    ];

    /// Protocol value of the beverage.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ristretto => "Ristretto",
            Self::Espresso => "Espresso",
            Self::Lungo => "Lungo",
            Self::Water => "Water",
            Self::Americano => "Americano",
        }
    }
}

impl fmt::Display for CoffeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CoffeeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidConfig {
                field: "beverage",
                reason: format!("unknown beverage {:?}", s),
            })
    }
}

/// Brew temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum TemperatureType {
    /// Medium (0x00), the machine default.
    #[default]
    Medium = 0,
    /// Low (0x01).
    Low = 1,
    /// High (0x02).
    High = 2,
}

impl TemperatureType {
    /// Every temperature setting.
    pub const ALL: [TemperatureType; 3] = [Self::Low, Self::Medium, Self::High];

    /// Protocol value of the temperature.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    /// Parse a configured temperature.
    ///
    /// Anything other than `Low` or `High` falls back to `Medium`.
    pub fn from_config(value: &str) -> Self {
        match value.trim() {
            v if v.eq_ignore_ascii_case("low") => Self::Low,
            v if v.eq_ignore_ascii_case("high") => Self::High,
            _ => Self::Medium,
        }
    }
}

impl fmt::Display for TemperatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
        }
    }
}

/// Encode a two-digit decimal field the way the machine expects it.
///
/// The value is zero-padded to two decimal digits and the digits are then
/// read as a hex byte, so 5 becomes `0x05` and 12 would become `0x12`.
fn decimal_field(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Build the brew command for a beverage at a temperature.
pub fn encode_brew_command(
    coffee: CoffeeType,
    temperature: TemperatureType,
) -> [u8; BREW_COMMAND_LEN] {
    let mut frame = [0u8; BREW_COMMAND_LEN];
    frame[..BREW_COMMAND_PREFIX.len()].copy_from_slice(&BREW_COMMAND_PREFIX);
    frame[8] = decimal_field(temperature.to_raw());
    frame[9] = decimal_field(coffee.to_raw());
    frame
}

/// Build the cancel command.
pub fn encode_cancel_command() -> [u8; 4] {
    CANCEL_COMMAND
}
