//! Tracking facade for beacon.
//!
//! Application code records events and visits through [`Tracker`]. Each call
//! returns immediately; the delivery queue underneath persists the work and
//! sends it to the collector when connectivity allows.
//!
//! # Architecture
//!
//! - [`Tracker`] builds events, sanitizes their property keys and hands them
//!   to the queue
//! - [`VisitCoordinator`] owns the current visit and releases events that
//!   were tracked before the first visit existed
//! - [`LifecycleHooks`] routes delivery outcomes to consumer callbacks
//! - [`TrackingConfig`] layers defaults, `beacon.toml` and `BEACON_`
//!   environment variables
//!
//! # Example
//!
//! ```no_run
//! use beacon_core::Properties;
//! use beacon_tracking::{LifecycleHooks, Tracker, TrackingConfig};
//!
//! # async fn example() -> beacon_tracking::Result<()> {
//! let config = TrackingConfig::load()?;
//! let hooks = LifecycleHooks::new().on_failed(|payload, error| {
//!     eprintln!("gave up on {}: {error}", payload.id());
//! });
//!
//! let tracker = Tracker::builder(config).hooks(hooks).build()?;
//! tracker.init().await?;
//! tracker.track("app_opened", Properties::new());
//! tracker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hooks;
pub mod sanitize;
pub mod session;
pub mod tracker;

pub use config::{TrackingConfig, CONFIG_FILE, ENV_PREFIX};
pub use error::{Result, TrackingError};
pub use hooks::{ErrorHook, FailureHook, LifecycleHooks, PayloadHook};
pub use session::{SessionState, VisitCoordinator};
pub use tracker::{Tracker, TrackerBuilder};
