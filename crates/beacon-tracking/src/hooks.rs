//! Lifecycle hook slots.
//!
//! Consumers register optional callbacks for the five lifecycle hooks. Each
//! slot is independently optional: an event routed to an empty slot is
//! dropped with a one-time warning, and a callback that panics is logged
//! and otherwise ignored. Neither ever reaches the delivery queue.

use std::{
    collections::HashSet,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use beacon_core::{ErrorReport, EventHandler, Hook, LifecycleEvent, Payload};
use parking_lot::Mutex;
use tracing::{error, warn};

/// Callback receiving a payload.
pub type PayloadHook = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Callback receiving a payload and the error of a failed attempt.
pub type FailureHook = Arc<dyn Fn(&Payload, &ErrorReport) + Send + Sync>;

/// Callback receiving an anomaly and the payload it concerns, if any.
pub type ErrorHook = Arc<dyn Fn(Option<&Payload>, &ErrorReport) + Send + Sync>;

/// Optional callbacks for the delivery lifecycle.
///
/// # Example
///
/// ```
/// use beacon_tracking::LifecycleHooks;
///
/// let hooks = LifecycleHooks::new()
///     .on_succeeded(|payload| println!("delivered {}", payload.id()))
///     .on_error(|payload, error| eprintln!("{error} ({:?})", payload.map(|p| p.id())));
/// assert!(hooks.is_registered(beacon_core::Hook::Succeeded));
/// ```
#[derive(Default)]
pub struct LifecycleHooks {
    started: Option<PayloadHook>,
    succeeded: Option<PayloadHook>,
    failure: Option<FailureHook>,
    failed: Option<FailureHook>,
    error: Option<ErrorHook>,
    warned: Mutex<HashSet<Hook>>,
}

impl LifecycleHooks {
    /// Creates hooks with every slot empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a payload is accepted by the queue.
    #[must_use]
    pub fn on_started(mut self, f: impl Fn(&Payload) + Send + Sync + 'static) -> Self {
        self.started = Some(Arc::new(f));
        self
    }

    /// Called when the collector confirms a payload.
    #[must_use]
    pub fn on_succeeded(mut self, f: impl Fn(&Payload) + Send + Sync + 'static) -> Self {
        self.succeeded = Some(Arc::new(f));
        self
    }

    /// Called for every failed attempt, including the last one.
    #[must_use]
    pub fn on_failure(
        mut self,
        f: impl Fn(&Payload, &ErrorReport) + Send + Sync + 'static,
    ) -> Self {
        self.failure = Some(Arc::new(f));
        self
    }

    /// Called when delivery of a payload is abandoned.
    #[must_use]
    pub fn on_failed(
        mut self,
        f: impl Fn(&Payload, &ErrorReport) + Send + Sync + 'static,
    ) -> Self {
        self.failed = Some(Arc::new(f));
        self
    }

    /// Called for anomalies that do not end delivery.
    #[must_use]
    pub fn on_error(
        mut self,
        f: impl Fn(Option<&Payload>, &ErrorReport) + Send + Sync + 'static,
    ) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    /// Whether a callback is registered for `hook`.
    pub fn is_registered(&self, hook: Hook) -> bool {
        match hook {
            Hook::Started => self.started.is_some(),
            Hook::Succeeded => self.succeeded.is_some(),
            Hook::Failure => self.failure.is_some(),
            Hook::Failed => self.failed.is_some(),
            Hook::Error => self.error.is_some(),
        }
    }

    /// Hooks with a registered callback.
    pub fn registered(&self) -> Vec<Hook> {
        Hook::ALL.into_iter().filter(|hook| self.is_registered(*hook)).collect()
    }

    /// Runs the callback for `event`. Returns `false` if its slot is empty.
    fn dispatch(&self, event: &LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::Started { payload } => match &self.started {
                Some(f) => f(payload),
                None => return false,
            },
            LifecycleEvent::Succeeded { payload, .. } => match &self.succeeded {
                Some(f) => f(payload),
                None => return false,
            },
            LifecycleEvent::Failure { payload, error, .. } => match &self.failure {
                Some(f) => f(payload, error),
                None => return false,
            },
            LifecycleEvent::Failed { payload, error, .. } => match &self.failed {
                Some(f) => f(payload, error),
                None => return false,
            },
            LifecycleEvent::Error { payload, error } => match &self.error {
                Some(f) => f(payload.as_ref(), error),
                None => return false,
            },
        }
        true
    }

    fn warn_unregistered(&self, hook: Hook) {
        if self.warned.lock().insert(hook) {
            warn!(
                hook = %hook,
                category = "configuration",
                "no callback registered for lifecycle hook, events dropped"
            );
        }
    }
}

impl EventHandler for LifecycleHooks {
    fn handle_event(&self, event: &LifecycleEvent) {
        let hook = event.hook();
        match catch_unwind(AssertUnwindSafe(|| self.dispatch(event))) {
            Ok(true) => {},
            Ok(false) => self.warn_unregistered(hook),
            Err(_) => {
                error!(
                    hook = %hook,
                    payload_id = ?event.payload().map(Payload::id),
                    "lifecycle callback panicked"
                );
            },
        }
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks").field("registered", &self.registered()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use beacon_core::{ErrorCategory, Event, Properties};

    use super::*;

    fn payload() -> Payload {
        Event::new("click", Properties::new(), 1.0).into()
    }

    fn report() -> ErrorReport {
        ErrorReport::new(ErrorCategory::Transport, "HTTP 500", true)
    }

    #[test]
    fn events_reach_their_slot() {
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let (s, f) = (succeeded.clone(), failures.clone());
        let hooks = LifecycleHooks::new()
            .on_succeeded(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            })
            .on_failure(move |_, error| {
                assert!(error.retryable);
                f.fetch_add(1, Ordering::SeqCst);
            });

        hooks.handle_event(&LifecycleEvent::Succeeded { payload: payload(), attempt_number: 1 });
        hooks.handle_event(&LifecycleEvent::Failure {
            payload: payload(),
            attempt_number: 1,
            error: report(),
        });

        assert_eq!(succeeded.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_slots_are_no_ops() {
        let hooks = LifecycleHooks::new();
        assert!(hooks.registered().is_empty());

        hooks.handle_event(&LifecycleEvent::Started { payload: payload() });
        hooks.handle_event(&LifecycleEvent::Started { payload: payload() });
        hooks.handle_event(&LifecycleEvent::Error { payload: None, error: report() });

        let warned = hooks.warned.lock();
        assert_eq!(warned.len(), 2);
        assert!(warned.contains(&Hook::Started));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let hooks = LifecycleHooks::new().on_started(|_| panic!("consumer bug"));

        hooks.handle_event(&LifecycleEvent::Started { payload: payload() });

        assert!(hooks.warned.lock().is_empty());
    }

    #[test]
    fn error_hook_receives_optional_payload() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hooks = LifecycleHooks::new().on_error(move |payload, error| {
            sink.lock().push((payload.map(Payload::id), error.category));
        });

        let p = payload();
        hooks.handle_event(&LifecycleEvent::Error { payload: Some(p.clone()), error: report() });
        hooks.handle_event(&LifecycleEvent::Error { payload: None, error: report() });

        assert_eq!(
            *seen.lock(),
            vec![(Some(p.id()), ErrorCategory::Transport), (None, ErrorCategory::Transport)]
        );
    }
}
