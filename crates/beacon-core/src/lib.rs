//! Core domain models, clock and lifecycle events.
//!
//! Provides the tracking data model (events, visit records, queue jobs), the
//! persisted queue snapshot codec, the clock abstraction and the lifecycle
//! event types every other beacon crate builds on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod snapshot;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{
    ErrorCategory, ErrorReport, EventHandler, Hook, LifecycleEvent, MulticastEventHandler,
    NoOpEventHandler,
};
pub use models::{Event, EventId, Job, JobKind, Payload, Properties, Scalar, VisitId, VisitRecord};
pub use snapshot::QueueSnapshot;
pub use time::{Clock, RealClock, TestClock};
