//! `btleplug` implementation of the BLE capability.
//!
//! Wraps the first system adapter and hands out links to connected
//! peripherals with their GATT characteristics cached by UUID.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::backend::{
    AdapterState, Advertisement, BackendEvent, BleBackend, EventStream, MachineLink,
    Notification, NotificationStream,
};
use crate::error::{Error, Result};

impl From<CentralState> for AdapterState {
    fn from(state: CentralState) -> Self {
        match state {
            CentralState::PoweredOn => Self::PoweredOn,
            CentralState::PoweredOff => Self::PoweredOff,
            _ => Self::Unknown,
        }
    }
}

/// The host adapter, driven through `btleplug`.
#[derive(Clone)]
pub struct BtleplugBackend {
    adapter: Adapter,
}

impl BtleplugBackend {
    /// Open the first Bluetooth adapter of the system.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RadioUnavailable`] if the system has no adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::RadioUnavailable {
                state: "no adapter".to_string(),
            })?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn find_peripheral(&self, id: &str) -> Result<Peripheral> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == id)
            .ok_or_else(|| Error::ConnectFailed {
                reason: format!("peripheral {} is no longer known to the adapter", id),
            })
    }

    async fn advertisement(adapter: &Adapter, id: &PeripheralId) -> Option<BackendEvent> {
        let peripheral = match adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let local_name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|props| props.local_name);

        Some(BackendEvent::Advertisement(Advertisement {
            id: id.to_string(),
            local_name,
        }))
    }
}

#[async_trait]
impl BleBackend for BtleplugBackend {
    async fn adapter_state(&self) -> Result<AdapterState> {
        Ok(self.adapter.adapter_state().await?.into())
    }

    async fn events(&self) -> Result<EventStream> {
        let adapter = self.adapter.clone();
        let events = self.adapter.events().await?;

        let events = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        Self::advertisement(&adapter, &id).await
                    }
                    CentralEvent::ServicesAdvertisement { id, .. } => {
                        Self::advertisement(&adapter, &id).await
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        debug!("Device disconnected: {:?}", id);
                        Some(BackendEvent::Disconnected(id.to_string()))
                    }
                    CentralEvent::StateUpdate(state) => {
                        debug!("Adapter state update: {:?}", state);
                        Some(BackendEvent::AdapterState(state.into()))
                    }
                    _ => None,
                }
            }
        });

        Ok(Box::pin(events))
    }

    async fn start_scan(&self, services: &[Uuid]) -> Result<()> {
        self.adapter
            .start_scan(ScanFilter {
                services: services.to_vec(),
            })
            .await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<Box<dyn MachineLink>> {
        let peripheral = self.find_peripheral(id).await?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral
                .connect()
                .await
                .map_err(|e| Error::ConnectFailed {
                    reason: e.to_string(),
                })?;
        }

        debug!("Connected to {}", id);

        Ok(Box::new(BtleplugLink::new(peripheral)))
    }
}

/// A connected peripheral with its characteristics cached by UUID.
pub struct BtleplugLink {
    peripheral: Peripheral,
    characteristics: Arc<RwLock<HashMap<Uuid, Characteristic>>>,
}

impl BtleplugLink {
    fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            characteristics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn characteristic(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicMissing {
                uuid: uuid.to_string(),
            })
    }
}

#[async_trait]
impl MachineLink for BtleplugLink {
    fn id(&self) -> String {
        self.peripheral.id().to_string()
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn discover_characteristics(&self) -> Result<Vec<Uuid>> {
        self.peripheral.discover_services().await?;

        let mut chars = self.characteristics.write();
        chars.clear();

        for service in self.peripheral.services() {
            for characteristic in service.characteristics {
                trace!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid,
                    service.uuid
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", chars.len());

        Ok(chars.keys().copied().collect())
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(&uuid)?;
        let data = self.peripheral.read(&characteristic).await?;

        trace!("Read {:02X?} from characteristic {}", data, uuid);

        Ok(data)
    }

    async fn write(&self, uuid: Uuid, data: &[u8], with_response: bool) -> Result<()> {
        let characteristic = self.characteristic(&uuid)?;

        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.peripheral
            .write(&characteristic, data, write_type)
            .await?;

        trace!("Wrote {} bytes to characteristic {}", data.len(), uuid);

        Ok(())
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<()> {
        let characteristic = self.characteristic(&uuid)?;

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| Error::SubscribeFailed {
                uuid: uuid.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Subscribed to notifications from {}", uuid);

        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let notifications = self.peripheral.notifications().await?;

        Ok(Box::pin(notifications.map(|n| Notification {
            uuid: n.uuid,
            data: Bytes::from(n.value),
        })))
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
