//! The session task.
//!
//! One task per machine owns the connection and processes, in order, the
//! commands sent by [`MachineController`](crate::MachineController)
//! handles, the notifications of the current link, link losses and adapter
//! power changes. Events carry the generation of the connection that
//! produced them; anything from an earlier connection is dropped.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::ble::backend::{AdapterState, BackendEvent, MachineLink, Notification};
use crate::ble::characteristics::{CharacteristicSet, Observed};
use crate::ble::connection::SessionState;
use crate::ble::scanner::Scanner;
use crate::config::{DeviceIdentity, SessionConfig};
use crate::error::{Error, Result};
use crate::events::MachineEvents;
use crate::protocol::{
    encode_brew_command, encode_cancel_command, validate, CapsuleCount, CoffeeType,
    MachineStatus, ResponseStatus, SliderStatus, TemperatureType,
};
use crate::utils::with_timeout;

/// Result of a brew request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrewOutcome {
    /// The machine was not ready, nothing was sent.
    NotAttempted,
    /// The machine answered the brew command.
    Completed(ResponseStatus),
}

impl BrewOutcome {
    /// Check if the machine accepted the brew.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(status) if status.is_success())
    }
}

pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Brew {
        coffee: CoffeeType,
        temperature: TemperatureType,
        reply: oneshot::Sender<Result<BrewOutcome>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<ResponseStatus>>,
    },
    Reconnect {
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

pub(crate) enum Message {
    Command(Command),
    Notification {
        generation: u64,
        notification: Notification,
    },
    LinkLost {
        generation: u64,
    },
    Adapter(AdapterState),
    ReconnectDue {
        timer: u64,
    },
}

/// Session state readable without going through the task.
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    pub state: SessionState,
    pub link_up: bool,
    pub scanning: bool,
    pub last_status: Option<MachineStatus>,
    pub last_slider: Option<SliderStatus>,
    pub last_capsules: Option<CapsuleCount>,
    pub last_brew: Option<CoffeeType>,
    pub last_contact: Option<Instant>,
    pub last_contact_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// No status since the command was sent counts as still brewing.
    pub fn is_brewing(&self, coffee: CoffeeType) -> bool {
        self.last_brew == Some(coffee) && self.last_status.map_or(true, |s| s.is_brewing())
    }

    pub fn is_reachable_at(&self, now: Instant, window: std::time::Duration) -> bool {
        self.link_up
            || self
                .last_contact
                .map_or(false, |contact| now.saturating_duration_since(contact) < window)
    }
}

enum PendingKind {
    Brew {
        coffee: CoffeeType,
        reply: oneshot::Sender<Result<BrewOutcome>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<ResponseStatus>>,
    },
}

impl PendingKind {
    fn fail(self, error: Error) {
        match self {
            Self::Brew { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::Cancel { reply } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

enum Wake {
    Message(Option<Message>),
    ResponseExpired,
}

/// The command awaiting its response.
struct Pending {
    sent: Vec<u8>,
    deadline: Instant,
    kind: PendingKind,
}

struct Connection {
    link: Arc<dyn MachineLink>,
    characteristics: Option<CharacteristicSet>,
    tasks: Vec<JoinHandle<()>>,
}

pub(crate) struct Session {
    identity: Arc<DeviceIdentity>,
    config: SessionConfig,
    scanner: Arc<Scanner>,
    shared: Arc<RwLock<Snapshot>>,
    events: MachineEvents,
    inbox: mpsc::UnboundedReceiver<Message>,
    outbox: mpsc::UnboundedSender<Message>,
    generation: u64,
    connection: Option<Connection>,
    pending: Option<Pending>,
    reconnect_timer: Option<(u64, JoinHandle<()>)>,
    timers: u64,
}

impl Session {
    pub(crate) fn new(
        identity: Arc<DeviceIdentity>,
        config: SessionConfig,
        scanner: Arc<Scanner>,
        shared: Arc<RwLock<Snapshot>>,
        events: MachineEvents,
        inbox: mpsc::UnboundedReceiver<Message>,
        outbox: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            identity,
            config,
            scanner,
            shared,
            events,
            inbox,
            outbox,
            generation: 0,
            connection: None,
            pending: None,
            reconnect_timer: None,
            timers: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        let adapter_watch = self.watch_adapter().await;

        loop {
            let deadline = self.pending.as_ref().map(|p| p.deadline);

            let wake = tokio::select! {
                message = self.inbox.recv() => Wake::Message(message),
                _ = Self::expiry(deadline) => Wake::ResponseExpired,
            };

            match wake {
                Wake::ResponseExpired => self.expire_pending().await,
                Wake::Message(Some(Message::Command(Command::Shutdown))) | Wake::Message(None) => {
                    break
                }
                Wake::Message(Some(message)) => self.handle(message).await,
            }
        }

        self.cancel_reconnect();
        self.disconnect().await;
        if let Some(task) = adapter_watch {
            task.abort();
        }
        debug!("Session for {} stopped", self.identity.name);
    }

    async fn expiry(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    async fn handle(&mut self, message: Message) {
        match message {
            Message::Command(command) => self.handle_command(command).await,
            Message::Notification {
                generation,
                notification,
            } => {
                if generation == self.generation {
                    self.on_notification(notification).await;
                } else {
                    trace!("Dropping notification from connection {}", generation);
                }
            }
            Message::LinkLost { generation } => {
                if generation == self.generation && self.connection.is_some() {
                    self.on_link_lost().await;
                } else {
                    trace!("Ignoring link loss of connection {}", generation);
                }
            }
            Message::Adapter(state) => {
                if !state.is_powered_on() {
                    error!("Bluetooth unavailable: {}", state);
                    self.disconnect().await;
                }
            }
            Message::ReconnectDue { timer } => {
                let scheduled = self.reconnect_timer.as_ref().map(|(id, _)| *id);
                if scheduled != Some(timer) {
                    trace!("Ignoring cancelled reconnect {}", timer);
                    return;
                }
                self.reconnect_timer = None;
                if let Err(e) = self.connect().await {
                    warn!("Reconnect to {} failed: {}", self.identity.name, e);
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }
            Command::Brew {
                coffee,
                temperature,
                reply,
            } => self.brew(coffee, temperature, reply).await,
            Command::Cancel { reply } => self.cancel(reply).await,
            Command::Reconnect { reply } => {
                let result = self.reconnect().await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!("Reconnect to {} failed: {}", self.identity.name, e);
                        }
                    }
                }
            }
            Command::Disconnect { reply } => {
                self.cancel_reconnect();
                self.disconnect().await;
                let _ = reply.send(());
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    // === Connection ===

    fn set_state(&self, new_state: SessionState) {
        let mut shared = self.shared.write();
        let old_state = shared.state;
        if old_state != new_state {
            shared.state = new_state;
            debug!(
                "{}: {} -> {}",
                self.identity.name, old_state, new_state
            );
        }
    }

    async fn connect(&mut self) -> Result<()> {
        let ready = self.shared.read().state.is_ready();
        if let Some(connection) = &self.connection {
            if ready && connection.link.is_connected().await {
                return Ok(());
            }
        }

        self.disconnect().await;
        self.set_state(SessionState::Connecting);

        self.shared.write().scanning = true;
        let found = self.scanner.find(&self.identity.name).await;
        self.shared.write().scanning = false;

        let link: Arc<dyn MachineLink> = match found {
            Ok(link) => Arc::from(link),
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        self.connection = Some(Connection {
            link: link.clone(),
            characteristics: None,
            tasks: Vec::new(),
        });
        self.shared.write().link_up = true;

        match self.handshake(&link).await {
            Ok(characteristics) => {
                if let Some(connection) = self.connection.as_mut() {
                    connection.characteristics = Some(characteristics);
                }
                self.set_state(SessionState::Ready);
                info!("Session with {} ready", self.identity.name);
                Ok(())
            }
            Err(e) => {
                warn!("Handshake with {} failed: {}", self.identity.name, e);
                if link.is_connected().await {
                    self.disconnect().await;
                } else {
                    self.on_link_lost().await;
                }
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, link: &Arc<dyn MachineLink>) -> Result<CharacteristicSet> {
        self.watch_link(link).await?;

        let discovered = with_timeout(
            self.config.operation_timeout,
            "service discovery",
            link.discover_characteristics(),
        )
        .await?;
        let characteristics = CharacteristicSet::resolve(&discovered)?;

        tokio::time::sleep(self.config.settle_delay).await;

        if self.config.pairing_read_workaround {
            debug!("Reading state to start pairing");
            self.seed(link, &characteristics).await?;
        }

        self.set_state(SessionState::Authenticating);
        self.authenticate(link, &characteristics).await?;

        self.set_state(SessionState::Subscribing);
        self.subscribe(link, &characteristics).await?;

        self.seed(link, &characteristics).await?;

        Ok(characteristics)
    }

    /// Forward link loss and notifications of `link` to the session.
    async fn watch_link(&mut self, link: &Arc<dyn MachineLink>) -> Result<()> {
        let generation = self.generation;

        let mut events = self.scanner.backend().events().await?;
        let outbox = self.outbox.clone();
        let id = link.id();
        let loss_watch = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event == BackendEvent::Disconnected(id.clone()) {
                    let _ = outbox.send(Message::LinkLost { generation });
                    break;
                }
            }
        });
        self.push_task(loss_watch);

        let mut notifications = link.notifications().await?;
        let outbox = self.outbox.clone();
        let pump = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let message = Message::Notification {
                    generation,
                    notification,
                };
                if outbox.send(message).is_err() {
                    break;
                }
            }
        });
        self.push_task(pump);

        Ok(())
    }

    fn push_task(&mut self, task: JoinHandle<()>) {
        match self.connection.as_mut() {
            Some(connection) => connection.tasks.push(task),
            None => task.abort(),
        }
    }

    async fn watch_adapter(&self) -> Option<JoinHandle<()>> {
        let mut events = match self.scanner.backend().events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Cannot watch adapter state: {}", e);
                return None;
            }
        };

        let outbox = self.outbox.clone();
        Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let BackendEvent::AdapterState(state) = event {
                    if outbox.send(Message::Adapter(state)).is_err() {
                        break;
                    }
                }
            }
        }))
    }

    async fn authenticate(
        &self,
        link: &Arc<dyn MachineLink>,
        characteristics: &CharacteristicSet,
    ) -> Result<()> {
        debug!("Start authentication");
        trace!("Token: {:02X?}", self.identity.token);

        with_timeout(
            self.config.operation_timeout,
            "authentication",
            link.write(characteristics.auth, &self.identity.token, true),
        )
        .await
        .map_err(|e| match e {
            Error::Timeout { .. } => e,
            other => Error::AuthFailed {
                reason: other.to_string(),
            },
        })
    }

    async fn subscribe(
        &self,
        link: &Arc<dyn MachineLink>,
        characteristics: &CharacteristicSet,
    ) -> Result<()> {
        for (kind, uuid) in characteristics.observed() {
            with_timeout(
                self.config.operation_timeout,
                "subscribe",
                link.subscribe(uuid),
            )
            .await
            .map_err(|e| match e {
                Error::SubscribeFailed { .. } | Error::Timeout { .. } => e,
                other => Error::SubscribeFailed {
                    uuid: uuid.to_string(),
                    reason: other.to_string(),
                },
            })?;
            debug!("Subscribed to {:?} notifications", kind);
        }
        Ok(())
    }

    /// Read the observed characteristics once.
    async fn seed(
        &self,
        link: &Arc<dyn MachineLink>,
        characteristics: &CharacteristicSet,
    ) -> Result<()> {
        let timeout = self.config.operation_timeout;

        let data = with_timeout(timeout, "read status", link.read(characteristics.status)).await?;
        self.apply_status(MachineStatus::decode(&data)?);

        let data = with_timeout(timeout, "read slider", link.read(characteristics.slider)).await?;
        self.apply_slider(SliderStatus::decode(&data)?);

        let data =
            with_timeout(timeout, "read capsules", link.read(characteristics.capsules)).await?;
        self.apply_capsules(CapsuleCount::decode(&data)?);

        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.disconnect().await;
        self.connect().await
    }

    async fn disconnect(&mut self) {
        // Anything still in flight belongs to the connection being torn down.
        self.generation += 1;

        if let Some(pending) = self.pending.take() {
            pending.kind.fail(Error::NotConnected);
        }

        if let Some(connection) = self.connection.take() {
            for task in &connection.tasks {
                task.abort();
            }

            debug!("Disconnecting from {}", self.identity.name);
            if connection.link.is_connected().await {
                if let Err(e) = with_timeout(
                    self.config.operation_timeout,
                    "disconnect",
                    connection.link.disconnect(),
                )
                .await
                {
                    warn!("Disconnect from {} failed: {}", self.identity.name, e);
                }
            }

            let mut shared = self.shared.write();
            shared.last_contact = Some(Instant::now());
            shared.last_contact_at = Some(Utc::now());
        }

        {
            let mut shared = self.shared.write();
            shared.link_up = false;
            shared.last_brew = None;
            shared.last_status = None;
        }
        self.set_state(SessionState::Disconnected);
    }

    async fn on_link_lost(&mut self) {
        warn!("{} disconnected", self.identity.name);
        self.disconnect().await;
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_timer.is_some() {
            debug!("Reconnect already scheduled");
            return;
        }
        self.timers += 1;
        let timer = self.timers;

        let backoff = self.config.reconnect_backoff;
        debug!("Reconnecting in {:?}", backoff);

        let outbox = self.outbox.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = outbox.send(Message::ReconnectDue { timer });
        });
        self.reconnect_timer = Some((timer, handle));
    }

    fn cancel_reconnect(&mut self) {
        if let Some((_, handle)) = self.reconnect_timer.take() {
            debug!("Cancelling scheduled reconnect");
            handle.abort();
        }
    }

    // === Commands ===

    async fn brew(
        &mut self,
        coffee: CoffeeType,
        temperature: TemperatureType,
        reply: oneshot::Sender<Result<BrewOutcome>>,
    ) {
        if self.pending.is_some() {
            let _ = reply.send(Err(Error::SessionBusy));
            return;
        }

        if let Err(e) = self.connect().await {
            self.shared.write().last_brew = None;
            let _ = reply.send(Err(e));
            return;
        }

        let status = self.shared.read().last_status;
        match status {
            Some(status) => info!("{}", status),
            None => info!("No status"),
        }

        if !status.map_or(false, |s| s.ready_to_brew()) {
            debug!("Machine not ready to brew");
            self.shared.write().last_brew = None;
            let _ = reply.send(Ok(BrewOutcome::NotAttempted));
            return;
        }

        let frame = encode_brew_command(coffee, temperature);
        match self.send_command(&frame).await {
            Ok(deadline) => {
                self.pending = Some(Pending {
                    sent: frame.to_vec(),
                    deadline,
                    kind: PendingKind::Brew { coffee, reply },
                });
            }
            Err(e) => {
                self.shared.write().last_brew = None;
                let _ = reply.send(Err(e));
            }
        }
    }

    async fn cancel(&mut self, reply: oneshot::Sender<Result<ResponseStatus>>) {
        info!("Cancel command");

        if self.pending.is_some() {
            let _ = reply.send(Err(Error::SessionBusy));
            return;
        }

        if let Err(e) = self.connect().await {
            let _ = reply.send(Err(e));
            return;
        }

        let frame = encode_cancel_command();
        match self.send_command(&frame).await {
            Ok(deadline) => {
                self.pending = Some(Pending {
                    sent: frame.to_vec(),
                    deadline,
                    kind: PendingKind::Cancel { reply },
                });
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    /// Write a command and return the deadline of its response.
    async fn send_command(&mut self, frame: &[u8]) -> Result<Instant> {
        let (link, request) = match &self.connection {
            Some(Connection {
                link,
                characteristics: Some(characteristics),
                ..
            }) => (link.clone(), characteristics.request),
            _ => return Err(Error::NotConnected),
        };

        debug!("Sending command {:02X?}", frame);

        // The machine is busy until a fresh status says otherwise.
        self.shared.write().last_status = None;

        let written = with_timeout(
            self.config.operation_timeout,
            "write request",
            link.write(request, frame, true),
        )
        .await;

        match written {
            Ok(()) => Ok(Instant::now() + self.config.response_timeout),
            Err(e) => {
                if e.is_transport() {
                    self.disconnect().await;
                }
                Err(e)
            }
        }
    }

    async fn on_response(&mut self, data: Bytes) {
        let Some(pending) = self.pending.take() else {
            debug!("Unsolicited response {:02X?}", &data[..]);
            return;
        };

        let status = validate(&pending.sent, &data);
        debug!("Received response {:02X?}: {}", &data[..], status);

        match pending.kind {
            PendingKind::Brew { coffee, reply } => {
                self.shared.write().last_brew = status.is_success().then_some(coffee);
                let _ = reply.send(status.into_result().map(BrewOutcome::Completed));
            }
            PendingKind::Cancel { reply } => {
                let _ = reply.send(status.into_result());
            }
        }

        self.cycle_connection().await;
    }

    async fn expire_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        warn!(
            "No response to {:02X?} within {:?}",
            pending.sent, self.config.response_timeout
        );

        if matches!(pending.kind, PendingKind::Brew { .. }) {
            self.shared.write().last_brew = None;
        }
        pending.kind.fail(Error::Timeout {
            operation: "response",
        });

        self.cycle_connection().await;
    }

    /// The machine drops idle sessions, so a fresh one is set up after
    /// every command.
    async fn cycle_connection(&mut self) {
        if let Err(e) = self.reconnect().await {
            warn!("Reconnect to {} failed: {}", self.identity.name, e);
        }
    }

    // === Notifications ===

    async fn on_notification(&mut self, notification: Notification) {
        let kind = self
            .connection
            .as_ref()
            .and_then(|c| c.characteristics.as_ref())
            .and_then(|c| c.classify(&notification.uuid));

        let Some(kind) = kind else {
            trace!("Ignoring notification from {}", notification.uuid);
            return;
        };

        let data = notification.data;
        match kind {
            Observed::Status => match MachineStatus::decode(&data) {
                Ok(status) => self.apply_status(status),
                Err(e) => warn!("Dropping status notification: {}", e),
            },
            Observed::Slider => match SliderStatus::decode(&data) {
                Ok(slider) => self.apply_slider(slider),
                Err(e) => warn!("Dropping slider notification: {}", e),
            },
            Observed::Capsules => match CapsuleCount::decode(&data) {
                Ok(count) => self.apply_capsules(count),
                Err(e) => warn!("Dropping capsule notification: {}", e),
            },
            Observed::Response => self.on_response(data).await,
        }
    }

    fn apply_status(&self, status: MachineStatus) {
        debug!("{}", status);
        self.shared.write().last_status = Some(status);
        self.events.publish_status(status);
    }

    fn apply_slider(&self, slider: SliderStatus) {
        debug!("{}", slider);
        self.shared.write().last_slider = Some(slider);
        self.events.publish_slider(slider);
    }

    fn apply_capsules(&self, count: CapsuleCount) {
        debug!("{}", count);
        self.shared.write().last_capsules = Some(count);
        self.events.publish_capsules(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ready() -> MachineStatus {
        MachineStatus::decode(&[0x00, 0x02]).unwrap()
    }

    fn pumping() -> MachineStatus {
        MachineStatus::decode(&[0x00, 0x06]).unwrap()
    }

    #[test]
    fn test_is_brewing_without_status() {
        let snapshot = Snapshot {
            last_brew: Some(CoffeeType::Lungo),
            ..Default::default()
        };
        assert!(snapshot.is_brewing(CoffeeType::Lungo));
        assert!(!snapshot.is_brewing(CoffeeType::Espresso));
    }

    #[test]
    fn test_is_brewing_follows_status() {
        let mut snapshot = Snapshot {
            last_brew: Some(CoffeeType::Lungo),
            last_status: Some(pumping()),
            ..Default::default()
        };
        assert!(snapshot.is_brewing(CoffeeType::Lungo));

        snapshot.last_status = Some(ready());
        assert!(!snapshot.is_brewing(CoffeeType::Lungo));

        snapshot.last_brew = None;
        snapshot.last_status = Some(pumping());
        assert!(!snapshot.is_brewing(CoffeeType::Lungo));
    }

    #[test]
    fn test_is_reachable_at() {
        let window = Duration::from_secs(300);
        let contact = Instant::now();

        let mut snapshot = Snapshot::default();
        assert!(!snapshot.is_reachable_at(contact, window));

        snapshot.last_contact = Some(contact);
        assert!(snapshot.is_reachable_at(contact + Duration::from_secs(240), window));
        assert!(!snapshot.is_reachable_at(contact + Duration::from_secs(360), window));

        snapshot.link_up = true;
        assert!(snapshot.is_reachable_at(contact + Duration::from_secs(360), window));
    }

    #[test]
    fn test_brew_outcome_success() {
        let accepted = validate(&[0x03, 0x05], &[0x83, 0x05, 0x01, 0x20]);
        let refused = validate(&[0x03, 0x05], &[0xC3, 0x05, 0x02, 0x24, 0x12]);
        assert!(BrewOutcome::Completed(accepted).is_success());
        assert!(!BrewOutcome::Completed(refused).is_success());
        assert!(!BrewOutcome::NotAttempted.is_success());
    }
}
