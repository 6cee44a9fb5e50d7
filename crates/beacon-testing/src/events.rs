//! Lifecycle event recording for deterministic async validation.
//!
//! [`HookRecorder`] is an [`EventHandler`] that keeps every lifecycle event
//! it sees and lets tests wait, with a bounded timeout, until a hook has
//! fired a given number of times.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use beacon_core::{ErrorCategory, EventHandler, Hook, LifecycleEvent, Payload};
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// Default timeout when waiting for lifecycle events in tests.
///
/// Generous enough for CI machines with variable timing while still
/// preventing test suite hangs.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Records lifecycle events in arrival order.
#[derive(Debug, Default)]
pub struct HookRecorder {
    events: Mutex<Vec<LifecycleEvent>>,
    notify: Notify,
}

impl HookRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every event recorded so far.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// Hooks of the recorded events, in order.
    pub fn hooks(&self) -> Vec<Hook> {
        self.events.lock().iter().map(LifecycleEvent::hook).collect()
    }

    /// Number of events recorded for `hook`.
    pub fn count(&self, hook: Hook) -> usize {
        self.events.lock().iter().filter(|event| event.hook() == hook).count()
    }

    /// Payload ids of the events recorded for `hook`, in order.
    pub fn payload_ids(&self, hook: Hook) -> Vec<Uuid> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.hook() == hook)
            .filter_map(|event| event.payload().map(Payload::id))
            .collect()
    }

    /// Hooks recorded for one payload, in order.
    pub fn hooks_for(&self, payload_id: Uuid) -> Vec<Hook> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.payload().map(Payload::id) == Some(payload_id))
            .map(LifecycleEvent::hook)
            .collect()
    }

    /// Categories of the errors recorded for `hook`.
    pub fn error_categories(&self, hook: Hook) -> Vec<ErrorCategory> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.hook() == hook)
            .filter_map(|event| event.error().map(|error| error.category))
            .collect()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Waits until `hook` has fired at least `count` times.
    ///
    /// # Errors
    ///
    /// Fails after [`DEFAULT_EVENT_TIMEOUT`].
    pub async fn wait_for(&self, hook: Hook, count: usize) -> Result<()> {
        self.wait_for_with_timeout(hook, count, DEFAULT_EVENT_TIMEOUT).await
    }

    /// Like [`wait_for`](Self::wait_for) with a custom timeout.
    ///
    /// # Errors
    ///
    /// Fails when `timeout` elapses first.
    pub async fn wait_for_with_timeout(
        &self,
        hook: Hook,
        count: usize,
        timeout: Duration,
    ) -> Result<()> {
        let result = tokio::time::timeout(timeout, async {
            loop {
                // registered before the check so a concurrent record is not missed
                let notified = self.notify.notified();
                if self.count(hook) >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;

        if result.is_err() {
            bail!(
                "{hook} fired {} times within {timeout:?}, expected at least {count}",
                self.count(hook)
            );
        }
        Ok(())
    }
}

impl EventHandler for HookRecorder {
    fn handle_event(&self, event: &LifecycleEvent) {
        self.events.lock().push(event.clone());
        self.notify.notify_waiters();
    }
}
