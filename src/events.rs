//! Machine state notifications.
//!
//! Every decoded status, slider and capsule notification is published here.
//! Consumers either hold a broadcast receiver or register a callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::protocol::{CapsuleCount, MachineStatus, SliderStatus};

const CHANNEL_CAPACITY: usize = 64;

/// Handle for managing callback registrations.
///
/// When dropped, the callback is automatically unregistered.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Fan-out of machine notifications.
#[derive(Clone)]
pub struct MachineEvents {
    status_tx: broadcast::Sender<MachineStatus>,
    slider_tx: broadcast::Sender<SliderStatus>,
    capsule_tx: broadcast::Sender<CapsuleCount>,
    callback_counter: Arc<AtomicU64>,
}

impl Default for MachineEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineEvents {
    /// Create a hub with no subscribers.
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (slider_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (capsule_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        Self {
            status_tx,
            slider_tx,
            capsule_tx,
            callback_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn publish_status(&self, status: MachineStatus) {
        let _ = self.status_tx.send(status);
    }

    pub(crate) fn publish_slider(&self, slider: SliderStatus) {
        let _ = self.slider_tx.send(slider);
    }

    pub(crate) fn publish_capsules(&self, count: CapsuleCount) {
        let _ = self.capsule_tx.send(count);
    }

    /// Receive every machine status.
    pub fn subscribe_status(&self) -> broadcast::Receiver<MachineStatus> {
        self.status_tx.subscribe()
    }

    /// Receive every slider position.
    pub fn subscribe_slider(&self) -> broadcast::Receiver<SliderStatus> {
        self.slider_tx.subscribe()
    }

    /// Receive every capsule count.
    pub fn subscribe_capsules(&self) -> broadcast::Receiver<CapsuleCount> {
        self.capsule_tx.subscribe()
    }

    /// Register a callback for machine status updates.
    pub fn on_status<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&MachineStatus) + Send + Sync + 'static,
    {
        self.listen(self.status_tx.subscribe(), callback)
    }

    /// Register a callback for slider updates.
    pub fn on_slider<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&SliderStatus) + Send + Sync + 'static,
    {
        self.listen(self.slider_tx.subscribe(), callback)
    }

    /// Register a callback for capsule count updates.
    pub fn on_capsules<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&CapsuleCount) + Send + Sync + 'static,
    {
        self.listen(self.capsule_tx.subscribe(), callback)
    }

    fn listen<T, F>(&self, mut rx: broadcast::Receiver<T>, callback: F) -> CallbackHandle
    where
        T: Clone + Send + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => callback(&update),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }
}
