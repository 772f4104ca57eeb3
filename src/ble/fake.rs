//! In-process machine used to drive sessions in tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use crate::ble::backend::{
    AdapterState, Advertisement, BackendEvent, BleBackend, EventStream, MachineLink,
    Notification, NotificationStream,
};
use crate::ble::uuids::*;
use crate::error::{Error, Result};

/// Delay between starting a scan and the machine advertising.
pub(crate) const ADVERTISING_DELAY: Duration = Duration::from_millis(100);

pub(crate) fn broadcast_stream<T>(rx: broadcast::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
{
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }))
}

/// How the machine answers command requests.
#[derive(Debug, Clone)]
pub(crate) enum Responder {
    /// Echo the command with ok status and reason 0x20.
    Accept,
    /// Always answer with this frame.
    Reply(Vec<u8>),
    /// Never answer.
    Silent,
}

impl Responder {
    fn answer(&self, request: &[u8]) -> Option<Vec<u8>> {
        match self {
            Self::Accept if request.len() >= 2 => {
                Some(vec![0x80 | (request[0] & 0x3F), request[1], 0x01, 0x20])
            }
            Self::Accept | Self::Silent => None,
            Self::Reply(frame) => Some(frame.clone()),
        }
    }
}

/// A simulated machine.
#[derive(Debug, Clone)]
pub(crate) struct FakeMachine {
    pub name: String,
    pub id: String,
    pub status: Vec<u8>,
    pub slider: Vec<u8>,
    pub capsules: Vec<u8>,
    pub characteristics: Vec<Uuid>,
    pub responder: Responder,
    pub reject_auth: bool,
    pub reject_subscribe: Option<Uuid>,
    /// Connections left that go out of range while authenticating.
    pub drops_on_auth: Arc<AtomicUsize>,
}

impl FakeMachine {
    /// A ready machine with a closed slider and 50 capsules left.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: format!("fake-{}", name),
            status: vec![0x00, 0x02],
            slider: vec![0x02],
            capsules: vec![0x00, 0x32],
            characteristics: REQUIRED_CHARACTERISTICS.to_vec(),
            responder: Responder::Accept,
            reject_auth: false,
            reject_subscribe: None,
            drops_on_auth: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn status(mut self, status: [u8; 2]) -> Self {
        self.status = status.to_vec();
        self
    }

    pub fn responder(mut self, responder: Responder) -> Self {
        self.responder = responder;
        self
    }

    pub fn without(mut self, uuid: Uuid) -> Self {
        self.characteristics.retain(|c| *c != uuid);
        self
    }

    pub fn reject_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    pub fn reject_subscribe(mut self, uuid: Uuid) -> Self {
        self.reject_subscribe = Some(uuid);
        self
    }

    /// Lose the link during the auth write of the next `times` connections.
    pub fn drop_on_auth(self, times: usize) -> Self {
        self.drops_on_auth.store(times, Ordering::SeqCst);
        self
    }
}

/// A simulated adapter holding any number of machines.
#[derive(Clone)]
pub(crate) struct FakeBackend {
    inner: Arc<BackendInner>,
}

struct BackendInner {
    adapter: Mutex<AdapterState>,
    events: broadcast::Sender<BackendEvent>,
    machines: Mutex<HashMap<String, FakeMachine>>,
    links: Mutex<Vec<Arc<FakeLink>>>,
    active_scans: AtomicUsize,
    max_active_scans: AtomicUsize,
    scans_started: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(BackendInner {
                adapter: Mutex::new(AdapterState::PoweredOn),
                events,
                machines: Mutex::new(HashMap::new()),
                links: Mutex::new(Vec::new()),
                active_scans: AtomicUsize::new(0),
                max_active_scans: AtomicUsize::new(0),
                scans_started: AtomicUsize::new(0),
            }),
        }
    }

    pub fn with_machine(self, machine: FakeMachine) -> Self {
        self.add_machine(machine);
        self
    }

    pub fn add_machine(&self, machine: FakeMachine) {
        self.inner
            .machines
            .lock()
            .insert(machine.id.clone(), machine);
    }

    pub fn set_adapter_state(&self, state: AdapterState) {
        *self.inner.adapter.lock() = state;
        let _ = self.inner.events.send(BackendEvent::AdapterState(state));
    }

    /// Every link handed out so far, oldest first.
    pub fn links(&self) -> Vec<Arc<FakeLink>> {
        self.inner.links.lock().clone()
    }

    pub fn last_link(&self) -> Option<Arc<FakeLink>> {
        self.inner.links.lock().last().cloned()
    }

    pub fn connects(&self) -> usize {
        self.inner.links.lock().len()
    }

    pub fn scans_started(&self) -> usize {
        self.inner.scans_started.load(Ordering::SeqCst)
    }

    pub fn max_active_scans(&self) -> usize {
        self.inner.max_active_scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleBackend for FakeBackend {
    async fn adapter_state(&self) -> Result<AdapterState> {
        Ok(*self.inner.adapter.lock())
    }

    async fn events(&self) -> Result<EventStream> {
        Ok(broadcast_stream(self.inner.events.subscribe()))
    }

    async fn start_scan(&self, services: &[Uuid]) -> Result<()> {
        assert!(services.iter().all(is_machine_service));

        self.inner.scans_started.fetch_add(1, Ordering::SeqCst);
        let active = self.inner.active_scans.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .max_active_scans
            .fetch_max(active, Ordering::SeqCst);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ADVERTISING_DELAY).await;
            if inner.active_scans.load(Ordering::SeqCst) == 0 {
                return;
            }
            let machines: Vec<FakeMachine> = inner.machines.lock().values().cloned().collect();
            for machine in machines {
                let _ = inner
                    .events
                    .send(BackendEvent::Advertisement(Advertisement {
                        id: machine.id.clone(),
                        local_name: Some(machine.name.clone()),
                    }));
            }
        });

        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let _ = self
            .inner
            .active_scans
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<Box<dyn MachineLink>> {
        let machine = self
            .inner
            .machines
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ConnectFailed {
                reason: format!("unknown peripheral {}", id),
            })?;

        let link = Arc::new(FakeLink::new(machine, self.inner.events.clone()));
        self.inner.links.lock().push(link.clone());

        Ok(Box::new(LinkHandle(link)))
    }
}

/// One simulated connection.
pub(crate) struct FakeLink {
    machine: FakeMachine,
    connected: AtomicBool,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    subscribed: Mutex<Vec<Uuid>>,
    reads: AtomicUsize,
    notifications: broadcast::Sender<Notification>,
    backend_events: broadcast::Sender<BackendEvent>,
    request_written: Notify,
}

impl FakeLink {
    fn new(machine: FakeMachine, backend_events: broadcast::Sender<BackendEvent>) -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            machine,
            connected: AtomicBool::new(true),
            writes: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            notifications,
            backend_events,
            request_written: Notify::new(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Push a notification as the machine would.
    pub fn notify(&self, uuid: Uuid, data: &[u8]) {
        let _ = self.notifications.send(Notification {
            uuid,
            data: Bytes::copy_from_slice(data),
        });
    }

    /// The machine went out of range.
    pub fn drop_link(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .backend_events
                .send(BackendEvent::Disconnected(self.machine.id.clone()));
        }
    }

    pub fn writes_to(&self, uuid: Uuid) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .iter()
            .filter(|(target, _)| *target == uuid)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn subscribed(&self) -> Vec<Uuid> {
        self.subscribed.lock().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Wait until a command request has been written.
    pub async fn request_written(&self) {
        self.request_written.notified().await
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_up() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

struct LinkHandle(Arc<FakeLink>);

#[async_trait]
impl MachineLink for LinkHandle {
    fn id(&self) -> String {
        self.0.machine.id.clone()
    }

    async fn is_connected(&self) -> bool {
        self.0.is_up()
    }

    async fn discover_characteristics(&self) -> Result<Vec<Uuid>> {
        self.0.ensure_connected()?;
        Ok(self.0.machine.characteristics.clone())
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>> {
        self.0.ensure_connected()?;
        self.0.reads.fetch_add(1, Ordering::SeqCst);
        let machine = &self.0.machine;
        match uuid {
            u if u == STATUS_CHARACTERISTIC_UUID => Ok(machine.status.clone()),
            u if u == SLIDER_CHARACTERISTIC_UUID => Ok(machine.slider.clone()),
            u if u == CAPSULE_CHARACTERISTIC_UUID => Ok(machine.capsules.clone()),
            _ => Ok(Vec::new()),
        }
    }

    async fn write(&self, uuid: Uuid, data: &[u8], _with_response: bool) -> Result<()> {
        self.0.ensure_connected()?;

        if uuid == AUTH_CHARACTERISTIC_UUID
            && self
                .0
                .machine
                .drops_on_auth
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        {
            self.0.drop_link();
            return Err(Error::NotConnected);
        }

        if uuid == AUTH_CHARACTERISTIC_UUID && self.0.machine.reject_auth {
            return Err(Error::ConnectFailed {
                reason: "write not permitted".to_string(),
            });
        }

        self.0.writes.lock().push((uuid, data.to_vec()));

        if uuid == REQUEST_CHARACTERISTIC_UUID {
            if let Some(answer) = self.0.machine.responder.answer(data) {
                self.0.notify(RESPONSE_CHARACTERISTIC_UUID, &answer);
            }
            self.0.request_written.notify_one();
        }

        Ok(())
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<()> {
        self.0.ensure_connected()?;
        if self.0.machine.reject_subscribe == Some(uuid) {
            return Err(Error::ConnectFailed {
                reason: "notify not permitted".to_string(),
            });
        }
        self.0.subscribed.lock().push(uuid);
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        Ok(broadcast_stream(self.0.notifications.subscribe()))
    }

    async fn disconnect(&self) -> Result<()> {
        self.0.drop_link();
        Ok(())
    }
}
