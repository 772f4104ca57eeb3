//! Machine and session configuration.

use std::time::Duration;
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::protocol::{decode_hex_token, CoffeeType, TemperatureType};

/// Highest capsule stock that can be configured.
pub const MAX_CAPSULE_COUNT: u16 = 1000;

/// Name shown for a machine without a configured display name.
pub const DEFAULT_DISPLAY_NAME: &str = "Coffee";

/// User configuration of one machine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeviceConfig {
    /// Name shown to users.
    pub display_name: Option<String>,
    /// Advertised BLE name, e.g. `Expert_DB1234`.
    pub name: String,
    /// Pairing token as hex, dashes allowed.
    pub token: Option<String>,
    /// Brew temperature.
    pub temperature: TemperatureType,
    /// Beverages not offered.
    pub disabled_beverages: Vec<CoffeeType>,
    /// Capsules in a full stock; `0` disables the stock level.
    pub max_capsule_count: u16,
}

impl DeviceConfig {
    /// Create a configuration for the machine advertising `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the pairing token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Validate the configuration into the identity a session uses.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if the name is empty
    /// - [`Error::InvalidTokenFormat`] if the token is not hex
    pub fn validate(&self) -> Result<DeviceIdentity> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidConfig {
                field: "name",
                reason: "must not be empty".to_string(),
            });
        }

        let token = match self.token.as_deref() {
            Some(token) => decode_hex_token(token)?,
            None => {
                warn!("No token configured for {}, authentication will send an empty key", name);
                Vec::new()
            }
        };

        let max_capsule_count = if self.max_capsule_count > MAX_CAPSULE_COUNT {
            error!(
                "max_capsule_count {} above {} is not possible, using {}",
                self.max_capsule_count, MAX_CAPSULE_COUNT, MAX_CAPSULE_COUNT
            );
            MAX_CAPSULE_COUNT
        } else {
            self.max_capsule_count
        };

        Ok(DeviceIdentity {
            name: name.to_string(),
            display_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
            token,
            temperature: self.temperature,
            enabled_beverages: self.enabled_beverages(),
            max_capsule_count,
        })
    }

    /// Split the advertised name into model and serial number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the name has no `_` separator.
    pub fn model_and_serial(&self) -> Result<(String, String)> {
        let mut parts = self.name.split('_');
        match (parts.next(), parts.next()) {
            (Some(model), Some(serial)) if !model.is_empty() && !serial.is_empty() => {
                Ok((model.to_string(), serial.to_string()))
            }
            _ => Err(Error::InvalidConfig {
                field: "name",
                reason: format!("{:?} is not of the form <model>_<serial>", self.name),
            }),
        }
    }

    /// Beverages that are not disabled, in menu order.
    pub fn enabled_beverages(&self) -> Vec<CoffeeType> {
        CoffeeType::ALL
            .into_iter()
            .filter(|coffee| !self.disabled_beverages.contains(coffee))
            .collect()
    }
}

/// Validated identity of a machine, fixed for the life of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Advertised BLE name.
    pub name: String,
    /// Name shown to users.
    pub display_name: String,
    /// Decoded pairing token.
    pub token: Vec<u8>,
    /// Brew temperature.
    pub temperature: TemperatureType,
    /// Beverages offered.
    pub enabled_beverages: Vec<CoffeeType>,
    /// Capsules in a full stock, at most [`MAX_CAPSULE_COUNT`].
    pub max_capsule_count: u16,
}

/// Timing and platform knobs of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Wait after connecting before the handshake.
    pub settle_delay: Duration,
    /// Wait after an unexpected link loss before reconnecting.
    pub reconnect_backoff: Duration,
    /// How long a machine counts as reachable after the last contact.
    pub unreachable_window: Duration,
    /// Watchdog tick period.
    pub watchdog_period: Duration,
    /// Longest scan for the machine.
    pub scan_timeout: Duration,
    /// Longest connection attempt.
    pub connect_timeout: Duration,
    /// Longest single GATT read, write, subscribe or discovery.
    pub operation_timeout: Duration,
    /// Longest wait for a command response.
    pub response_timeout: Duration,
    /// Read the status characteristics before authenticating. Some BLE
    /// stacks only start pairing on the first read, and the machine expects
    /// pairing right after connecting.
    pub pairing_read_workaround: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            reconnect_backoff: Duration::from_secs(10),
            unreachable_window: Duration::from_secs(5 * 60),
            watchdog_period: Duration::from_secs(60),
            scan_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(10),
            pairing_read_workaround: cfg!(any(
                target_os = "linux",
                target_os = "freebsd",
                target_os = "windows"
            )),
        }
    }
}
