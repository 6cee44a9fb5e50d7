//! Persistent, connectivity-gated delivery queue.
//!
//! This crate implements the delivery side of beacon: a local queue that
//! holds tracking events and visit records until a remote collector has
//! confirmed them, surviving network loss, process restarts and collector
//! failures.
//!
//! # Architecture
//!
//! Jobs travel through two independent sequential lanes, one for visit
//! records and one for tracking events. A worker per lane runs
//! timer-driven dispatch cycles, each attempting at most one delivery:
//!
//! 1. **Gate** - skip while offline, paused or waiting for a visit
//! 2. **Send** - post the head job through the lane's transport
//! 3. **Settle** - confirm and persist, or requeue at the head, or drop
//!
//! # Key Features
//!
//! - **Durable** - every mutation is followed by a snapshot write
//! - **Connectivity aware** - offline time never consumes attempts
//! - **Deduplicating** - one job per payload id, confirmed ids remembered
//! - **Visit ordering** - events never overtake the visit they belong to
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use beacon_core::{Event, NoOpEventHandler, Properties, RealClock};
//! use beacon_delivery::{
//!     AlwaysOnline, ClientConfig, DeliveryError, DeliveryQueue, FileSnapshotStore, QueueConfig,
//!     Sink, TrackPosts, TrackUrls, VisitGate,
//! };
//!
//! # async fn example() -> Result<(), DeliveryError> {
//! let urls = TrackUrls {
//!     event: Some("https://collector.example.com/events".to_string()),
//!     visit: Some("https://collector.example.com/visits".to_string()),
//! };
//! let sink = Sink::resolve(&TrackPosts::default(), &urls, &ClientConfig::default())?;
//! let config = QueueConfig::default();
//! let intervals = config.intervals;
//!
//! let queue = DeliveryQueue::new(
//!     config,
//!     sink,
//!     Arc::new(FileSnapshotStore::new(".beacon")),
//!     Arc::new(AlwaysOnline::new()),
//!     Arc::new(RealClock::new()),
//!     Arc::new(NoOpEventHandler::new()),
//!     VisitGate::untracked(),
//! );
//!
//! queue.restore().await;
//! queue.start(intervals).await?;
//! queue.enqueue(Event::new("signup", Properties::new(), 1_700_000_000.0));
//! queue.stop().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod connectivity;
pub mod error;
pub mod queue;
pub mod retry;
pub mod sink;
pub mod storage;
pub mod visit_gate;
mod worker;
mod worker_pool;

pub use client::{
    post_fn, ClientConfig, DeliveryRequest, HttpTransport, PostError, PostFn, PostTransport,
    Transport,
};
pub use connectivity::{AlwaysOnline, ConnectivityMonitor, ManualConnectivity};
pub use error::{DeliveryError, Result};
pub use queue::{
    CycleReport, DeliveryQueue, DispatchOutcome, EnqueueStatus, JobHandle, QueueConfig, QueueStats,
};
pub use retry::{IntervalPolicy, RetryPolicy};
pub use sink::{Sink, TrackPosts, TrackUrls};
pub use storage::{FileSnapshotStore, SnapshotStore};
pub use visit_gate::{VisitGate, VisitResolution};
