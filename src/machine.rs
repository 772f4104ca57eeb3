//! Machine controller.
//!
//! The public handle to one coffee machine. Cloning is cheap; every clone
//! talks to the same session task, which stops when the last clone is
//! dropped or [`MachineController::shutdown`] is called.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::ble::connection::SessionState;
use crate::ble::platform::BtleplugBackend;
use crate::ble::scanner::Scanner;
use crate::config::{DeviceConfig, DeviceIdentity, SessionConfig};
use crate::error::{Error, Result};
use crate::events::MachineEvents;
use crate::protocol::{
    CapsuleCount, CoffeeType, MachineStatus, ResponseStatus, SliderStatus, TemperatureType,
};
use crate::session::{BrewOutcome, Command, Message, Session, Snapshot};
use crate::watchdog::Supervised;

struct Inner {
    identity: Arc<DeviceIdentity>,
    config: SessionConfig,
    shared: Arc<RwLock<Snapshot>>,
    events: MachineEvents,
    outbox: mpsc::UnboundedSender<Message>,
    /// Set while a brew or cancel is awaiting its response.
    command_in_flight: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.outbox.send(Message::Command(Command::Shutdown));
    }
}

/// Clears the in-flight flag when the command finishes or is abandoned.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to one coffee machine.
#[derive(Clone)]
pub struct MachineController {
    inner: Arc<Inner>,
}

impl MachineController {
    /// Start the session task of a machine.
    ///
    /// Must be called from within a tokio runtime. Machines sharing an
    /// adapter should share one [`Scanner`].
    pub fn spawn(identity: DeviceIdentity, config: SessionConfig, scanner: Arc<Scanner>) -> Self {
        let identity = Arc::new(identity);
        let shared = Arc::new(RwLock::new(Snapshot::default()));
        let events = MachineEvents::new();
        let (outbox, inbox) = mpsc::unbounded_channel();

        let session = Session::new(
            identity.clone(),
            config.clone(),
            scanner,
            shared.clone(),
            events.clone(),
            inbox,
            outbox.clone(),
        );
        let task = tokio::spawn(session.run());

        debug!("Started session for {}", identity.name);

        Self {
            inner: Arc::new(Inner {
                identity,
                config,
                shared,
                events,
                outbox,
                command_in_flight: AtomicBool::new(false),
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Validate `device` and start its session on the first system adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the system has
    /// no Bluetooth adapter.
    pub async fn with_platform(device: &DeviceConfig, config: SessionConfig) -> Result<Self> {
        let identity = device.validate()?;
        let backend = BtleplugBackend::new().await?;
        let scanner = Arc::new(Scanner::with_config(Arc::new(backend), &config));
        Ok(Self::spawn(identity, config, scanner))
    }

    // === Identity and state ===

    /// The machine this controller talks to.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    /// The session timing.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Status, slider and capsule notifications.
    pub fn events(&self) -> &MachineEvents {
        &self.inner.events
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.inner.shared.read().state
    }

    /// Check if a link to the machine is up, including during the handshake.
    pub fn is_connected(&self) -> bool {
        self.inner.shared.read().link_up
    }

    /// Check if the machine is connected or was in contact within the
    /// unreachable window.
    pub fn is_reachable(&self) -> bool {
        self.is_reachable_at(Instant::now())
    }

    /// [`is_reachable`](Self::is_reachable) evaluated at `now`.
    pub fn is_reachable_at(&self, now: Instant) -> bool {
        self.inner
            .shared
            .read()
            .is_reachable_at(now, self.inner.config.unreachable_window)
    }

    /// Check if the session is looking for the machine.
    pub fn is_scanning(&self) -> bool {
        self.inner.shared.read().scanning
    }

    /// Check if `coffee` is being brewed.
    ///
    /// True when the last accepted brew was `coffee` and no status has
    /// arrived since, or the latest status reports brewing.
    pub fn is_brewing(&self, coffee: CoffeeType) -> bool {
        self.inner.shared.read().is_brewing(coffee)
    }

    /// The latest machine status of the current connection.
    pub fn last_status(&self) -> Option<MachineStatus> {
        self.inner.shared.read().last_status
    }

    /// The latest slider position.
    pub fn last_slider(&self) -> Option<SliderStatus> {
        self.inner.shared.read().last_slider
    }

    /// The latest capsule count.
    pub fn last_capsule_count(&self) -> Option<CapsuleCount> {
        self.inner.shared.read().last_capsules
    }

    /// When the last connection ended.
    pub fn last_contact(&self) -> Option<DateTime<Utc>> {
        self.inner.shared.read().last_contact_at
    }

    // === Commands ===

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.inner
            .outbox
            .send(Message::Command(command(reply)))
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)
    }

    fn claim(&self) -> Result<InFlight<'_>> {
        self.inner
            .command_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::SessionBusy)?;
        Ok(InFlight(&self.inner.command_in_flight))
    }

    /// Connect, authenticate and subscribe, unless already connected.
    pub async fn connect(&self) -> Result<()> {
        self.request(|reply| Command::Connect { reply }).await?
    }

    /// Brew `coffee` at `temperature`.
    ///
    /// Connects first if needed. Nothing is sent unless the machine reports
    /// it is ready to brew. The session is re-established once the machine
    /// has answered.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionBusy`] if a brew or cancel is awaiting its response
    /// - [`Error::ResponseMismatch`] if the machine answered another command
    /// - [`Error::Timeout`] if the machine did not answer
    /// - connection errors from [`connect`](Self::connect)
    pub async fn brew(
        &self,
        coffee: CoffeeType,
        temperature: TemperatureType,
    ) -> Result<BrewOutcome> {
        let _in_flight = self.claim()?;
        self.request(|reply| Command::Brew {
            coffee,
            temperature,
            reply,
        })
        .await?
    }

    /// Brew `coffee` at the configured temperature.
    pub async fn brew_configured(&self, coffee: CoffeeType) -> Result<BrewOutcome> {
        self.brew(coffee, self.inner.identity.temperature).await
    }

    /// Cancel the running brew.
    ///
    /// # Errors
    ///
    /// Same as [`brew`](Self::brew).
    pub async fn cancel(&self) -> Result<ResponseStatus> {
        let _in_flight = self.claim()?;
        self.request(|reply| Command::Cancel { reply }).await?
    }

    /// Drop the link, if any, and connect again.
    pub async fn reconnect(&self) -> Result<()> {
        self.request(|reply| Command::Reconnect { reply: Some(reply) })
            .await?
    }

    /// Ask the session to reconnect without waiting for the outcome.
    pub fn request_reconnect(&self) {
        let _ = self
            .inner
            .outbox
            .send(Message::Command(Command::Reconnect { reply: None }));
    }

    /// Drop the link. Does nothing when not connected.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Disconnect and stop the session task.
    pub async fn shutdown(&self) {
        let _ = self
            .inner
            .outbox
            .send(Message::Command(Command::Shutdown));

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Supervised for MachineController {
    fn name(&self) -> &str {
        &self.inner.identity.name
    }

    fn is_connected(&self) -> bool {
        MachineController::is_connected(self)
    }

    fn is_reachable_at(&self, now: Instant) -> bool {
        MachineController::is_reachable_at(self, now)
    }

    fn is_scanning(&self) -> bool {
        MachineController::is_scanning(self)
    }

    fn request_reconnect(&self) {
        MachineController::request_reconnect(self)
    }
}
