//! Error types for the nespresso-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The Bluetooth radio is off or in an unknown power state.
    #[error("Bluetooth radio unavailable: {state}")]
    RadioUnavailable {
        /// The adapter state that was observed.
        state: String,
    },

    /// Failed to establish a connection to the machine.
    #[error("Connection failed: {reason}")]
    ConnectFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// A required characteristic is not exposed by the machine.
    #[error("Characteristic missing: {uuid}")]
    CharacteristicMissing {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Writing the pairing token was rejected or failed.
    #[error("Authentication failed: {reason}")]
    AuthFailed {
        /// Description of the failure.
        reason: String,
    },

    /// Enabling notifications on a characteristic failed.
    #[error("Subscribe to {uuid} failed: {reason}")]
    SubscribeFailed {
        /// The characteristic that could not be subscribed.
        uuid: String,
        /// Description of the failure.
        reason: String,
    },

    /// A response frame did not correlate with the command that was sent.
    #[error("Response {received:02X?} does not match command {sent:02X?}")]
    ResponseMismatch {
        /// The command frame that was written.
        sent: Vec<u8>,
        /// The response frame that arrived.
        received: Vec<u8>,
    },

    /// A bounded wait expired.
    #[error("Timed out during {operation}")]
    Timeout {
        /// The operation that did not finish in time.
        operation: &'static str,
    },

    /// A command is already awaiting its response on this session.
    #[error("Session busy: a command is still awaiting its response")]
    SessionBusy,

    /// Operation requires a connection but the machine is not connected.
    #[error("Machine not connected")]
    NotConnected,

    /// The pairing token is not valid hex.
    #[error("Invalid token format: {reason}")]
    InvalidTokenFormat {
        /// Why the token was rejected.
        reason: String,
    },

    /// A frame was shorter than its decoder requires.
    #[error("{frame} frame too short: {actual} bytes (need at least {expected})")]
    ShortFrame {
        /// Which frame was being decoded.
        frame: &'static str,
        /// Minimum number of bytes.
        expected: usize,
        /// Number of bytes received.
        actual: usize,
    },

    /// A configuration value failed validation.
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The session task has stopped.
    #[error("Session closed")]
    SessionClosed,
}

impl Error {
    /// Link-level failures that the reconnect cycle recovers from on its own.
    ///
    /// Protocol errors (authentication, missing characteristics, subscribe
    /// failures) and format errors return `false`.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_) | Self::ConnectFailed { .. } | Self::Timeout { .. } | Self::NotConnected
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(Error::Timeout { operation: "connect" }.is_transport());
        assert!(Error::ConnectFailed {
            reason: "gone".to_string()
        }
        .is_transport());
        assert!(!Error::AuthFailed {
            reason: "nak".to_string()
        }
        .is_transport());
        assert!(!Error::SessionBusy.is_transport());
        assert!(!Error::ShortFrame {
            frame: "status",
            expected: 2,
            actual: 1
        }
        .is_transport());
    }

    #[test]
    fn test_error_display() {
        let err = Error::ResponseMismatch {
            sent: vec![0x03, 0x06],
            received: vec![0x83, 0x05],
        };
        assert_eq!(
            err.to_string(),
            "Response [83, 05] does not match command [03, 06]"
        );
    }
}
