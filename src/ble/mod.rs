//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy transport for finding
//! and talking to Nespresso machines.

pub mod backend;
pub mod characteristics;
pub mod connection;
#[cfg(test)]
pub(crate) mod fake;
pub mod platform;
pub mod scanner;
pub mod uuids;

pub use backend::{
    AdapterState, Advertisement, BackendEvent, BleBackend, MachineLink, Notification,
};
pub use characteristics::CharacteristicSet;
pub use connection::SessionState;
pub use platform::{BtleplugBackend, BtleplugLink};
pub use scanner::Scanner;
pub use uuids::*;
