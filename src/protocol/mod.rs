//! Protocol module for parsing and constructing frames.
//!
//! This module contains the implementations for:
//! - Brew and cancel command construction
//! - Status, slider and capsule counter parsing
//! - Response correlation
//! - Pairing token decoding

pub mod commands;
pub mod response;
pub mod status;
pub mod token;

pub use commands::{encode_brew_command, encode_cancel_command, CoffeeType, TemperatureType};
pub use response::{validate, ResponseOutcome, ResponseReason, ResponseStatus};
pub use status::{BrewStatus, CapsuleCount, MachineStatus, SliderStatus};
pub use token::decode_hex_token;
