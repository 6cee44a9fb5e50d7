//! Lifecycle events emitted by the delivery queue.
//!
//! Every job moves through a small lifecycle: it is started when accepted
//! by the queue, may see any number of failures, and ends either succeeded
//! or failed. Anomalies that are not tied to an attempt outcome (duplicate
//! ids, persistence faults, missing sinks) are reported as errors.
//!
//! ```text
//!                    Started/Succeeded/Failure/Failed/Error
//! ┌─────────────────┐         Events          ┌────────────────────┐
//! │ DeliveryQueue   │ ──────────────────────▶ │ MulticastHandler   │
//! │ (Producer)      │                         │ (Event Dispatcher) │
//! └─────────────────┘                         └────────────────────┘
//!                                                       │
//!                                            ┌──────────┴──────────┐
//!                                            ▼                     ▼
//!                                   ┌─────────────────┐  ┌──────────────────┐
//!                                   │ LifecycleHooks  │  │ Extra subscriber │
//!                                   │ (caller slots)  │  │ (metrics, tests) │
//!                                   └─────────────────┘  └──────────────────┘
//! ```

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::models::Payload;

/// Lifecycle hook slot an event is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// Job accepted by the queue.
    Started,
    /// Delivery confirmed by the collector.
    Succeeded,
    /// A delivery attempt failed; the job may still be retried.
    Failure,
    /// Delivery gave up; the job was dropped.
    Failed,
    /// Anomaly not tied to an attempt outcome.
    Error,
}

impl Hook {
    /// Every hook slot.
    pub const ALL: [Self; 5] =
        [Self::Started, Self::Succeeded, Self::Failure, Self::Failed, Self::Error];

    /// Name of the hook slot as seen by integrators.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failure => "failure",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error taxonomy surfaced to hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No usable network at dispatch time.
    Connectivity,
    /// Collector rejected the payload or did not answer in time.
    Transport,
    /// Integration is misconfigured.
    Configuration,
    /// The same payload id was produced twice.
    Duplicate,
    /// Reading or writing the queue snapshot failed.
    Persistence,
    /// Unexpected internal fault.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connectivity => write!(f, "connectivity"),
            Self::Transport => write!(f, "transport"),
            Self::Configuration => write!(f, "configuration"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::Persistence => write!(f, "persistence"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Error description handed to `failure`, `failed` and `error` hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Taxonomy bucket of the error.
    pub category: ErrorCategory,
    /// Human-readable description.
    pub message: String,
    /// Whether the queue will try again.
    pub retryable: bool,
}

impl ErrorReport {
    /// Creates a report.
    pub fn new(category: ErrorCategory, message: impl Into<String>, retryable: bool) -> Self {
        Self { category, message: message.into(), retryable }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Events emitted by the delivery queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// Job accepted by the queue.
    Started {
        /// Accepted payload.
        payload: Payload,
    },

    /// Collector confirmed delivery.
    Succeeded {
        /// Delivered payload.
        payload: Payload,
        /// Attempt that succeeded (1-based).
        attempt_number: u32,
    },

    /// A delivery attempt failed.
    Failure {
        /// Payload whose attempt failed.
        payload: Payload,
        /// Attempt that failed (1-based).
        attempt_number: u32,
        /// Why the attempt failed.
        error: ErrorReport,
    },

    /// Delivery gave up and the job was dropped.
    Failed {
        /// Dropped payload.
        payload: Payload,
        /// Last attempt made (1-based).
        attempt_number: u32,
        /// Error that ended delivery.
        error: ErrorReport,
    },

    /// Anomaly reported without ending delivery.
    Error {
        /// Payload concerned, if the anomaly is tied to one.
        payload: Option<Payload>,
        /// What went wrong.
        error: ErrorReport,
    },
}

impl LifecycleEvent {
    /// Hook slot this event is routed to.
    pub fn hook(&self) -> Hook {
        match self {
            Self::Started { .. } => Hook::Started,
            Self::Succeeded { .. } => Hook::Succeeded,
            Self::Failure { .. } => Hook::Failure,
            Self::Failed { .. } => Hook::Failed,
            Self::Error { .. } => Hook::Error,
        }
    }

    /// Payload the event concerns, if any.
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Started { payload }
            | Self::Succeeded { payload, .. }
            | Self::Failure { payload, .. }
            | Self::Failed { payload, .. } => Some(payload),
            Self::Error { payload, .. } => payload.as_ref(),
        }
    }

    /// Error report carried by the event, if any.
    pub fn error(&self) -> Option<&ErrorReport> {
        match self {
            Self::Failure { error, .. }
            | Self::Failed { error, .. }
            | Self::Error { error, .. } => Some(error),
            Self::Started { .. } | Self::Succeeded { .. } => None,
        }
    }
}

/// Trait for handling lifecycle events.
///
/// Called synchronously from the queue, so implementations must return
/// quickly and must not block on I/O. Handlers never influence delivery:
/// whatever they do, the queue carries on.
pub trait EventHandler: Send + Sync + fmt::Debug {
    /// Handles a lifecycle event.
    fn handle_event(&self, event: &LifecycleEvent);
}

/// No-op event handler that discards all events.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op event handler.
    pub fn new() -> Self {
        Self
    }
}

impl EventHandler for NoOpEventHandler {
    fn handle_event(&self, _event: &LifecycleEvent) {}
}

/// Event handler that forwards events to multiple subscribers in
/// registration order.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a new multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a subscriber to receive lifecycle events.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

impl EventHandler for MulticastEventHandler {
    fn handle_event(&self, event: &LifecycleEvent) {
        for handler in &self.handlers {
            handler.handle_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::models::{Event, Properties};

    #[derive(Debug)]
    struct CountingHandler {
        event_count: Arc<AtomicUsize>,
    }

    impl CountingHandler {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let counter = Arc::new(AtomicUsize::new(0));
            (Self { event_count: counter.clone() }, counter)
        }
    }

    impl EventHandler for CountingHandler {
        fn handle_event(&self, _event: &LifecycleEvent) {
            self.event_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn started_event() -> LifecycleEvent {
        LifecycleEvent::Started {
            payload: Payload::Tracking(Event::new("click", Properties::new(), 1.0)),
        }
    }

    #[test]
    fn no_op_handler_discards_events() {
        NoOpEventHandler::new().handle_event(&started_event());
    }

    #[test]
    fn multicast_handler_forwards_to_all_subscribers() {
        let mut multicast = MulticastEventHandler::new();
        let (first, first_count) = CountingHandler::new();
        let (second, second_count) = CountingHandler::new();
        multicast.add_subscriber(Arc::new(first));
        multicast.add_subscriber(Arc::new(second));

        assert_eq!(multicast.subscriber_count(), 2);

        multicast.handle_event(&started_event());

        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_route_to_their_hook() {
        let payload = Payload::Tracking(Event::new("click", Properties::new(), 1.0));
        let error = ErrorReport::new(ErrorCategory::Transport, "HTTP 500", true);

        let failure = LifecycleEvent::Failure {
            payload: payload.clone(),
            attempt_number: 2,
            error: error.clone(),
        };
        assert_eq!(failure.hook(), Hook::Failure);
        assert_eq!(failure.error(), Some(&error));
        assert_eq!(failure.payload(), Some(&payload));

        let anomaly = LifecycleEvent::Error { payload: None, error };
        assert_eq!(anomaly.hook(), Hook::Error);
        assert!(anomaly.payload().is_none());
    }

    #[test]
    fn error_report_display_includes_category() {
        let report = ErrorReport::new(ErrorCategory::Duplicate, "id seen twice", false);
        assert_eq!(report.to_string(), "[duplicate] id seen twice");
        assert_eq!(Hook::Failed.to_string(), "failed");
    }
}
