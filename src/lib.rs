// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # nespresso-ble
//!
//! A Rust library for controlling Nespresso Expert coffee machines over
//! Bluetooth Low Energy.
//!
//! ## Features
//!
//! - **Discovery**: Find a machine by its advertised name
//! - **Pairing**: Authenticate with the machine's pairing token
//! - **Brewing**: Brew Ristretto, Espresso, Lungo, Americano or hot water
//!   at low, medium or high temperature, and cancel a running brew
//! - **Live State**: Machine status, slider position and capsule stock
//!   as they change
//! - **Self-healing**: Reconnects after link loss, with a watchdog for
//!   machines that stay out of range
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nespresso_ble::{CoffeeType, DeviceConfig, MachineController, Result, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let device = DeviceConfig::new("Expert_DB1234").with_token("0a1b2c3d-4e5f6a7b");
//!     let machine = MachineController::with_platform(&device, SessionConfig::default()).await?;
//!
//!     machine.connect().await?;
//!     if let Some(status) = machine.last_status() {
//!         println!("{}", status);
//!     }
//!
//!     let outcome = machine.brew_configured(CoffeeType::Lungo).await?;
//!     println!("Brewed: {}", outcome.is_success());
//!
//!     machine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group. The
//! machine expects pairing right after connecting, which BlueZ only starts
//! on the first read; see [`SessionConfig::pairing_read_workaround`].
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration and
//!   decoded machine state

// Public modules
pub mod ble;
pub mod config;
pub mod error;
pub mod events;
pub mod machine;
pub mod protocol;
pub mod utils;
pub mod watchdog;

mod session;

// Re-exports for convenience
pub use config::{DeviceConfig, DeviceIdentity, SessionConfig};
pub use error::{Error, Result};
pub use events::{CallbackHandle, MachineEvents};
pub use machine::MachineController;
pub use session::BrewOutcome;
pub use watchdog::{Supervised, Watchdog, WatchdogAction, WatchdogPolicy};

// Re-export commonly used types from submodules
pub use ble::connection::SessionState;
pub use ble::scanner::Scanner;
pub use protocol::{
    BrewStatus, CapsuleCount, CoffeeType, MachineStatus, ResponseOutcome, ResponseReason,
    ResponseStatus, SliderStatus, TemperatureType,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<MachineController>();
        let _ = std::any::TypeId::of::<Scanner>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<MachineStatus>();
        let _ = std::any::TypeId::of::<CapsuleCount>();
        let _ = std::any::TypeId::of::<ResponseStatus>();
        let _ = std::any::TypeId::of::<BrewOutcome>();
    }
}
