//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for Nespresso Expert communication.

use uuid::Uuid;

// Services (advertised, used as the scan filter)
/// Command service UUID.
pub const COMMAND_SERVICE_UUID: Uuid = Uuid::from_u128(0x06aa1910_f22a_11e3_9daa_0002a5d5c51b);
/// Authentication service UUID.
pub const AUTH_SERVICE_UUID: Uuid = Uuid::from_u128(0x06aa1920_f22a_11e3_9daa_0002a5d5c51b);

// Characteristics
/// Pairing token characteristic (confirmed write).
pub const AUTH_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x06aa3a41_f22a_11e3_9daa_0002a5d5c51b);
/// Machine status characteristic (read, notify).
pub const STATUS_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x06aa3a12_f22a_11e3_9daa_0002a5d5c51b);
/// Command request characteristic (write).
pub const REQUEST_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x06aa3a42_f22a_11e3_9daa_0002a5d5c51b);
/// Command response characteristic (notify).
pub const RESPONSE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x06aa3a52_f22a_11e3_9daa_0002a5d5c51b);
/// Slider position characteristic (read, notify).
pub const SLIDER_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x06aa3a22_f22a_11e3_9daa_0002a5d5c51b);
/// Capsule counter characteristic (read, notify).
pub const CAPSULE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x06aa3a15_f22a_11e3_9daa_0002a5d5c51b);

/// Services advertised by the machine.
pub const ADVERTISED_SERVICES: [Uuid; 2] = [AUTH_SERVICE_UUID, COMMAND_SERVICE_UUID];

/// Every characteristic a session needs.
pub const REQUIRED_CHARACTERISTICS: [Uuid; 6] = [
    AUTH_CHARACTERISTIC_UUID,
    REQUEST_CHARACTERISTIC_UUID,
    RESPONSE_CHARACTERISTIC_UUID,
    STATUS_CHARACTERISTIC_UUID,
    SLIDER_CHARACTERISTIC_UUID,
    CAPSULE_CHARACTERISTIC_UUID,
];

/// Check if a service UUID belongs to the machine.
pub fn is_machine_service(uuid: &Uuid) -> bool {
    ADVERTISED_SERVICES.contains(uuid)
}
