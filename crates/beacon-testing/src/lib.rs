//! Test infrastructure and utilities for deterministic testing.
//!
//! Provides a ready-wired delivery queue with scripted transports, an
//! in-memory snapshot store, manual connectivity and a lifecycle recorder,
//! plus fixture builders and a wiremock-backed collector for HTTP tests.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use beacon_core::Clock;
use beacon_delivery::{
    storage::mock::MemorySnapshotStore, DeliveryQueue, ManualConnectivity, QueueConfig,
};

pub mod events;
pub mod fixtures;
pub mod http;
pub mod invariants;
pub mod transport;

pub use beacon_core::TestClock;
pub use env_core::TestEnvBuilder;
pub use events::{HookRecorder, DEFAULT_EVENT_TIMEOUT};
pub use fixtures::{EventBuilder, VisitBuilder};
pub use http::MockCollector;
pub use transport::{MockOutcome, MockTransport};

mod env_core;

/// Test environment around one delivery queue.
///
/// Every collaborator of the queue is a test double the test can reach:
/// - `events` and `visits` script the transport of each lane
/// - `store` holds the persisted snapshot and can inject failures
/// - `connectivity` is flipped by hand
/// - `recorder` captures every lifecycle event
pub struct TestEnv {
    /// Deterministic clock, used by the queue unless the real clock was
    /// requested
    pub clock: TestClock,
    /// Connectivity monitor feeding the queue
    pub connectivity: Arc<ManualConnectivity>,
    /// Snapshot store shared across reopened queues
    pub store: MemorySnapshotStore,
    /// Transport of the tracking lane
    pub events: MockTransport,
    /// Transport of the visitor lane
    pub visits: MockTransport,
    /// Recorder receiving every lifecycle event
    pub recorder: Arc<HookRecorder>,
    /// Clock handed to the queue
    queue_clock: Arc<dyn Clock>,
    /// Queue configuration, reused when reopening
    config: QueueConfig,
    /// Whether the visit gate waits for a visit
    track_visits: bool,
    /// Whether lanes get a transport at all
    wire_event_sink: bool,
    wire_visit_sink: bool,
    /// Queue under test
    queue: DeliveryQueue,
}
