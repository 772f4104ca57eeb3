//! GATT characteristic resolution.
//!
//! A session resolves the six machine characteristics once per connection
//! and drops the set on disconnect.

use uuid::Uuid;

use crate::ble::uuids::*;
use crate::error::{Error, Result};

/// A characteristic that pushes state through notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Observed {
    /// Machine status.
    Status,
    /// Slider position.
    Slider,
    /// Capsule counter.
    Capsules,
    /// Command response.
    Response,
}

/// The characteristics of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicSet {
    /// Pairing token.
    pub auth: Uuid,
    /// Command request.
    pub request: Uuid,
    /// Command response.
    pub response: Uuid,
    /// Machine status.
    pub status: Uuid,
    /// Slider position.
    pub slider: Uuid,
    /// Capsule counter.
    pub capsules: Uuid,
}

impl CharacteristicSet {
    /// Resolve the set from the characteristics a peripheral exposes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CharacteristicMissing`] naming the first required
    /// characteristic that is absent.
    pub fn resolve(discovered: &[Uuid]) -> Result<Self> {
        if let Some(missing) = REQUIRED_CHARACTERISTICS
            .iter()
            .find(|uuid| !discovered.contains(uuid))
        {
            return Err(Error::CharacteristicMissing {
                uuid: missing.to_string(),
            });
        }

        Ok(Self {
            auth: AUTH_CHARACTERISTIC_UUID,
            request: REQUEST_CHARACTERISTIC_UUID,
            response: RESPONSE_CHARACTERISTIC_UUID,
            status: STATUS_CHARACTERISTIC_UUID,
            slider: SLIDER_CHARACTERISTIC_UUID,
            capsules: CAPSULE_CHARACTERISTIC_UUID,
        })
    }

    /// Characteristics to subscribe to, in subscription order.
    pub fn observed(&self) -> [(Observed, Uuid); 4] {
        [
            (Observed::Status, self.status),
            (Observed::Slider, self.slider),
            (Observed::Capsules, self.capsules),
            (Observed::Response, self.response),
        ]
    }

    /// Map a notifying characteristic to what it carries.
    pub fn classify(&self, uuid: &Uuid) -> Option<Observed> {
        self.observed()
            .into_iter()
            .find(|(_, candidate)| candidate == uuid)
            .map(|(kind, _)| kind)
    }
}
