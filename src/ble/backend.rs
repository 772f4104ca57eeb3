//! Platform BLE capability consumed by the session.
//!
//! The session never talks to `btleplug` directly. It drives a
//! [`BleBackend`] (adapter: power state, scanning, connecting) and the
//! [`MachineLink`] it hands out (one connected peripheral).

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use uuid::Uuid;

use crate::error::Result;

/// Power state of the Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdapterState {
    /// Not reported yet.
    #[default]
    Unknown,
    /// Radio on.
    PoweredOn,
    /// Radio off.
    PoweredOff,
}

impl AdapterState {
    /// Check if the radio can be used.
    pub fn is_powered_on(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::PoweredOn => write!(f, "poweredOn"),
            Self::PoweredOff => write!(f, "poweredOff"),
        }
    }
}

/// A peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Platform identifier of the peripheral.
    pub id: String,
    /// Advertised local name.
    pub local_name: Option<String>,
}

/// Adapter-wide event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The adapter power state changed.
    AdapterState(AdapterState),
    /// A peripheral advertised.
    Advertisement(Advertisement),
    /// A peripheral dropped its connection.
    Disconnected(String),
}

/// A value pushed by a notifying characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// UUID of the characteristic that sent the notification.
    pub uuid: Uuid,
    /// The notification data.
    pub data: Bytes,
}

/// Stream of adapter events.
pub type EventStream = BoxStream<'static, BackendEvent>;

/// Stream of characteristic notifications.
pub type NotificationStream = BoxStream<'static, Notification>;

/// The host Bluetooth adapter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BleBackend: Send + Sync {
    /// Current power state.
    async fn adapter_state(&self) -> Result<AdapterState>;

    /// Subscribe to adapter events. Each call returns an independent stream.
    async fn events(&self) -> Result<EventStream>;

    /// Start scanning for peripherals advertising any of `services`.
    async fn start_scan(&self, services: &[Uuid]) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a peripheral seen while scanning.
    async fn connect(&self, id: &str) -> Result<Box<dyn MachineLink>>;
}

/// A connected peripheral.
#[async_trait]
pub trait MachineLink: Send + Sync {
    /// Platform identifier, matching [`BackendEvent::Disconnected`].
    fn id(&self) -> String;

    /// Check if the link is still up.
    async fn is_connected(&self) -> bool;

    /// Discover all services and return every characteristic UUID found.
    async fn discover_characteristics(&self) -> Result<Vec<Uuid>>;

    /// Read a characteristic value.
    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>>;

    /// Write to a characteristic, acknowledged when `with_response` is set.
    async fn write(&self, uuid: Uuid, data: &[u8], with_response: bool) -> Result<()>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, uuid: Uuid) -> Result<()>;

    /// Stream of notifications from every subscribed characteristic.
    async fn notifications(&self) -> Result<NotificationStream>;

    /// Drop the connection.
    async fn disconnect(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_state() {
        assert!(AdapterState::PoweredOn.is_powered_on());
        assert!(!AdapterState::PoweredOff.is_powered_on());
        assert!(!AdapterState::default().is_powered_on());
        assert_eq!(AdapterState::PoweredOff.to_string(), "poweredOff");
    }
}
