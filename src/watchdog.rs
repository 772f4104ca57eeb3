//! Connection watchdog.
//!
//! Periodically checks a session and asks it to reconnect when the machine
//! has been out of contact for longer than the unreachable window.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// A session the watchdog can supervise.
pub trait Supervised: Send + Sync + 'static {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Check if a link to the machine is up.
    fn is_connected(&self) -> bool;

    /// Check if the machine was in contact recently enough at `now`.
    fn is_reachable_at(&self, now: Instant) -> bool;

    /// Check if the session is scanning for the machine.
    fn is_scanning(&self) -> bool;

    /// Start a reconnect without waiting for it.
    fn request_reconnect(&self);
}

/// What a watchdog tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchdogAction {
    /// Connected, nothing to do.
    Healthy,
    /// Disconnected, but in contact recently.
    GracePeriod,
    /// Unreachable, a scan is already looking for the machine.
    ScanInProgress,
    /// Unreachable and idle.
    Reconnect,
}

/// The watchdog decision rules.
pub struct WatchdogPolicy;

impl WatchdogPolicy {
    /// Decide what to do, checking connected, then reachable, then scanning.
    pub fn decide(connected: bool, reachable: bool, scanning: bool) -> WatchdogAction {
        if connected {
            WatchdogAction::Healthy
        } else if reachable {
            WatchdogAction::GracePeriod
        } else if scanning {
            WatchdogAction::ScanInProgress
        } else {
            WatchdogAction::Reconnect
        }
    }
}

/// Run one watchdog check against `target` at `now`.
pub fn check<T: Supervised>(target: &T, now: Instant) -> WatchdogAction {
    let action = WatchdogPolicy::decide(
        target.is_connected(),
        target.is_reachable_at(now),
        target.is_scanning(),
    );

    match action {
        WatchdogAction::Healthy => debug!("[WATCH] {} connected", target.name()),
        WatchdogAction::GracePeriod => {
            debug!("[WATCH] {} disconnected, but reachable", target.name())
        }
        WatchdogAction::ScanInProgress => {
            info!("[WATCH] {} unreachable, still scanning", target.name())
        }
        WatchdogAction::Reconnect => {
            info!(
                "[WATCH] {} unreachable, reconnecting. Try moving closer to the machine",
                target.name()
            );
            target.request_reconnect();
        }
    }

    action
}

/// A running watchdog. Stops when dropped.
pub struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Check `target` every `period`, starting one period from now.
    pub fn spawn<T: Supervised>(target: T, period: Duration) -> Self {
        debug!("[WATCH] Start watching {}", target.name());

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let now = interval.tick().await;
                check(&target, now);
            }
        });

        Self { handle }
    }

    /// Stop watching.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(5 * 60);

    #[derive(Default)]
    struct Target {
        connected: AtomicBool,
        scanning: AtomicBool,
        last_contact: RwLock<Option<Instant>>,
        reconnects: AtomicUsize,
    }

    impl Supervised for Arc<Target> {
        fn name(&self) -> &str {
            "Expert_DB1234"
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn is_reachable_at(&self, now: Instant) -> bool {
            self.is_connected()
                || self
                    .last_contact
                    .read()
                    .map_or(false, |contact| now.saturating_duration_since(contact) < WINDOW)
        }

        fn is_scanning(&self) -> bool {
            self.scanning.load(Ordering::SeqCst)
        }

        fn request_reconnect(&self) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_decide_priority() {
        use WatchdogAction::*;

        assert_eq!(WatchdogPolicy::decide(true, true, true), Healthy);
        assert_eq!(WatchdogPolicy::decide(true, false, false), Healthy);
        assert_eq!(WatchdogPolicy::decide(false, true, true), GracePeriod);
        assert_eq!(WatchdogPolicy::decide(false, false, true), ScanInProgress);
        assert_eq!(WatchdogPolicy::decide(false, false, false), Reconnect);
    }

    #[test]
    fn test_reconnects_once_window_elapsed() {
        let target = Arc::new(Target::default());
        let contact = Instant::now();
        *target.last_contact.write() = Some(contact);

        let action = check(&target, contact + Duration::from_secs(4 * 60));
        assert_eq!(action, WatchdogAction::GracePeriod);
        assert_eq!(target.reconnects.load(Ordering::SeqCst), 0);

        let action = check(&target, contact + Duration::from_secs(6 * 60));
        assert_eq!(action, WatchdogAction::Reconnect);
        assert_eq!(target.reconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_reconnect_while_scanning() {
        let target = Arc::new(Target::default());
        target.scanning.store(true, Ordering::SeqCst);

        assert_eq!(
            check(&target, Instant::now()),
            WatchdogAction::ScanInProgress
        );
        assert_eq!(target.reconnects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_connected_is_healthy() {
        let target = Arc::new(Target::default());
        target.connected.store(true, Ordering::SeqCst);

        assert_eq!(check(&target, Instant::now()), WatchdogAction::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_watchdog_ticks() {
        let target = Arc::new(Target::default());
        *target.last_contact.write() = Some(Instant::now());

        let watchdog = Watchdog::spawn(target.clone(), Duration::from_secs(60));

        // Ticks at 1..=4 minutes fall inside the window.
        tokio::time::sleep(Duration::from_secs(4 * 60 + 30)).await;
        assert_eq!(target.reconnects.load(Ordering::SeqCst), 0);

        // The 5 minute tick is the first outside it.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(target.reconnects.load(Ordering::SeqCst), 1);

        watchdog.stop();
        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        assert_eq!(target.reconnects.load(Ordering::SeqCst), 1);
    }
}
