//! Connectivity monitoring.
//!
//! The platform notifier is an external collaborator behind
//! [`ConnectivityMonitor`]. The queue mirrors its state into a
//! [`ConnectivityCell`] that only the subscription task writes and the
//! dispatch path reads.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use parking_lot::Mutex;
use tokio::sync::watch;

/// Source of connectivity state and change notifications.
pub trait ConnectivityMonitor: Send + Sync + std::fmt::Debug + 'static {
    /// Whether the network is usable right now.
    fn current_state(&self) -> bool;

    /// Receiver that observes every subsequent state change.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Monitor that always reports connectivity.
#[derive(Debug)]
pub struct AlwaysOnline {
    tx: watch::Sender<bool>,
}

impl AlwaysOnline {
    /// Creates the monitor.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }
}

impl Default for AlwaysOnline {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor for AlwaysOnline {
    fn current_state(&self) -> bool {
        true
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Monitor whose state is set by hand.
///
/// Used by embedders that receive connectivity changes from their own
/// platform integration, and by tests. Clones share state.
#[derive(Debug, Clone)]
pub struct ManualConnectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl ManualConnectivity {
    /// Creates a monitor starting in the given state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Publishes a new state to every subscriber.
    pub fn set(&self, online: bool) {
        self.tx.send_replace(online);
    }

    /// Convenience for `set(true)`.
    pub fn go_online(&self) {
        self.set(true);
    }

    /// Convenience for `set(false)`.
    pub fn go_offline(&self) {
        self.set(false);
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn current_state(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Connectivity flag scoped to one delivery queue.
///
/// Offline mode pins the reported state to `false` whatever the monitor
/// says.
#[derive(Debug)]
pub struct ConnectivityCell {
    online: AtomicBool,
    forced_offline: bool,
    restored_at: Mutex<Option<Instant>>,
}

impl ConnectivityCell {
    /// Creates a cell with the monitor's initial state.
    pub fn new(online: bool, forced_offline: bool) -> Self {
        Self { online: AtomicBool::new(online), forced_offline, restored_at: Mutex::new(None) }
    }

    /// Whether dispatch may attempt delivery.
    pub fn is_online(&self) -> bool {
        !self.forced_offline && self.online.load(Ordering::Acquire)
    }

    /// Records a state change. Returns `true` when the usable state went
    /// from offline to online.
    pub fn set(&self, online: bool, now: Instant) -> bool {
        let was_online = self.online.swap(online, Ordering::AcqRel);
        let mut restored_at = self.restored_at.lock();
        match (was_online, online) {
            (false, true) => *restored_at = Some(now),
            (true, false) => *restored_at = None,
            _ => {},
        }
        !was_online && online && !self.forced_offline
    }

    /// When connectivity came back, if it was lost and restored since the
    /// cell was created and is still up.
    pub fn restored_at(&self) -> Option<Instant> {
        if self.forced_offline {
            return None;
        }
        *self.restored_at.lock()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn cell_tracks_transitions() {
        let start = Instant::now();
        let cell = ConnectivityCell::new(false, false);
        assert!(!cell.is_online());
        assert_eq!(cell.restored_at(), None);

        let later = start + Duration::from_secs(2);
        assert!(cell.set(true, later));
        assert!(cell.is_online());
        assert_eq!(cell.restored_at(), Some(later));

        assert!(!cell.set(true, later + Duration::from_secs(1)));
        assert_eq!(cell.restored_at(), Some(later));

        assert!(!cell.set(false, later));
        assert_eq!(cell.restored_at(), None);
    }

    #[test]
    fn initial_connectivity_is_not_a_restoration() {
        let cell = ConnectivityCell::new(true, false);
        assert!(cell.is_online());
        assert_eq!(cell.restored_at(), None);
    }

    #[test]
    fn offline_mode_pins_state() {
        let cell = ConnectivityCell::new(true, true);
        assert!(!cell.is_online());
        assert!(!cell.set(false, Instant::now()));
        assert!(!cell.set(true, Instant::now()));
        assert!(!cell.is_online());
        assert!(cell.restored_at().is_none());
    }

    #[tokio::test]
    async fn manual_monitor_notifies_subscribers() {
        let monitor = ManualConnectivity::new(false);
        let mut rx = monitor.subscribe();

        monitor.go_online();
        rx.changed().await.unwrap();

        assert!(*rx.borrow());
        assert!(monitor.current_state());
    }

    #[test]
    fn always_online_reports_online() {
        let monitor = AlwaysOnline::new();
        assert!(monitor.current_state());
        assert!(*monitor.subscribe().borrow());
    }
}
