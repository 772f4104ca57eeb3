//! BLE scanning functionality.
//!
//! Finds a machine by its advertised name and connects to it. One
//! [`Scanner`] serves every session on an adapter and lets a single scan
//! run at a time.

use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::ble::backend::{AdapterState, BackendEvent, BleBackend, EventStream, MachineLink};
use crate::ble::uuids::ADVERTISED_SERVICES;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::utils::with_timeout;

/// Lowers the scanning flag when a scan ends, even if it is abandoned.
struct ScanningFlag(Arc<RwLock<bool>>);

impl ScanningFlag {
    fn raise(flag: &Arc<RwLock<bool>>) -> Self {
        *flag.write() = true;
        Self(flag.clone())
    }
}

impl Drop for ScanningFlag {
    fn drop(&mut self) {
        *self.0.write() = false;
    }
}

/// Finds and connects to machines.
pub struct Scanner {
    backend: Arc<dyn BleBackend>,
    /// Held for the duration of a scan.
    permit: Semaphore,
    is_scanning: Arc<RwLock<bool>>,
    scan_timeout: Duration,
    connect_timeout: Duration,
    /// How long to wait for the adapter to report its power state.
    settle_timeout: Duration,
}

impl Scanner {
    /// Create a scanner with the default timeouts.
    pub fn new(backend: Arc<dyn BleBackend>) -> Self {
        Self::with_config(backend, &SessionConfig::default())
    }

    /// Create a scanner using the scan and connect timeouts of `config`.
    pub fn with_config(backend: Arc<dyn BleBackend>, config: &SessionConfig) -> Self {
        Self {
            backend,
            permit: Semaphore::new(1),
            is_scanning: Arc::new(RwLock::new(false)),
            scan_timeout: config.scan_timeout,
            connect_timeout: config.connect_timeout,
            settle_timeout: config.operation_timeout,
        }
    }

    /// Get the underlying backend.
    pub fn backend(&self) -> &Arc<dyn BleBackend> {
        &self.backend
    }

    /// Check if a scan is running.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Make sure the radio is on.
    ///
    /// If the adapter has not reported a power state yet, waits for the
    /// first report.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RadioUnavailable`] if the adapter is, or settles,
    /// anywhere but powered on.
    pub async fn assert_bluetooth(&self) -> Result<()> {
        let state = self.backend.adapter_state().await?;
        debug!("Bluetooth state: {}", state);

        let state = match state {
            AdapterState::Unknown => self.wait_for_adapter_state().await?,
            known => known,
        };

        if state.is_powered_on() {
            Ok(())
        } else {
            error!("Bluetooth not available: {}", state);
            Err(Error::RadioUnavailable {
                state: state.to_string(),
            })
        }
    }

    async fn wait_for_adapter_state(&self) -> Result<AdapterState> {
        let mut events = self.backend.events().await?;

        // The state may have settled before we subscribed.
        let state = self.backend.adapter_state().await?;
        if state != AdapterState::Unknown {
            return Ok(state);
        }

        let wait = async {
            while let Some(event) = events.next().await {
                if let BackendEvent::AdapterState(state) = event {
                    if state != AdapterState::Unknown {
                        return Ok(state);
                    }
                }
            }
            Ok(AdapterState::Unknown)
        };

        match with_timeout(self.settle_timeout, "adapter state", wait).await {
            Err(Error::Timeout { .. }) => Ok(AdapterState::Unknown),
            other => other,
        }
    }

    /// Scan for the machine advertising `name` and connect to it.
    ///
    /// # Errors
    ///
    /// - [`Error::RadioUnavailable`] if the radio is off
    /// - [`Error::Timeout`] if the machine is not seen within the scan
    ///   timeout, or the connection does not complete in time
    /// - [`Error::ConnectFailed`] if the connection attempt fails
    pub async fn find(&self, name: &str) -> Result<Box<dyn MachineLink>> {
        self.assert_bluetooth().await?;

        let _permit = self.permit.acquire().await.map_err(|_| Error::SessionClosed)?;
        let _scanning = ScanningFlag::raise(&self.is_scanning);

        let mut events = self.backend.events().await?;

        info!("Scanning for {}", name);
        self.backend.start_scan(&ADVERTISED_SERVICES).await?;

        let found = with_timeout(self.scan_timeout, "scan", Self::wait_for(&mut events, name)).await;

        if let Err(e) = self.backend.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        let id = found?;
        debug!("Found {} as {}", name, id);

        let link = with_timeout(self.connect_timeout, "connect", async {
            self.backend.connect(&id).await.map_err(|e| match e {
                Error::ConnectFailed { .. } => e,
                other => Error::ConnectFailed {
                    reason: other.to_string(),
                },
            })
        })
        .await?;

        info!("Connected to {}", name);

        Ok(link)
    }

    async fn wait_for(events: &mut EventStream, name: &str) -> Result<String> {
        while let Some(event) = events.next().await {
            match event {
                BackendEvent::Advertisement(ad) if ad.local_name.as_deref() == Some(name) => {
                    return Ok(ad.id);
                }
                BackendEvent::AdapterState(state) if !state.is_powered_on() => {
                    return Err(Error::RadioUnavailable {
                        state: state.to_string(),
                    });
                }
                _ => {}
            }
        }

        Err(Error::ConnectFailed {
            reason: "adapter event stream ended".to_string(),
        })
    }
}
