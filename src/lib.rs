//! Durable, connectivity-aware analytics event delivery.
//!
//! `beacon` records analytics events and visit records on the device, keeps
//! them in a persisted queue and delivers them to a collector once the
//! network allows, in order and without loss across restarts.
//!
//! This crate re-exports the public API of the workspace:
//!
//! - [`model`]: data model, clock and lifecycle events
//! - [`delivery`]: the delivery queue, transports and persistence
//! - [`tracking`]: the [`Tracker`] facade and its configuration
//!
//! # Example
//!
//! ```no_run
//! use beacon::{LifecycleHooks, Properties, Tracker, TrackingConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! beacon::init_tracing()?;
//!
//! let hooks = LifecycleHooks::new()
//!     .on_succeeded(|payload| tracing::debug!(payload_id = %payload.id(), "delivered"));
//! let tracker = Tracker::builder(TrackingConfig::load()?).hooks(hooks).build()?;
//!
//! tracker.init().await?;
//! tracker.track("app_opened", Properties::new());
//! tracker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use beacon_core as model;
pub use beacon_core::{
    Clock, ErrorCategory, ErrorReport, Event, EventHandler, EventId, Hook, LifecycleEvent, Payload,
    Properties, RealClock, Scalar, VisitId, VisitRecord,
};
pub use beacon_delivery as delivery;
pub use beacon_delivery::{
    post_fn, ConnectivityMonitor, DeliveryError, PostError, QueueStats, SnapshotStore, TrackPosts,
    TrackUrls,
};
pub use beacon_tracking as tracking;
pub use beacon_tracking::{
    LifecycleHooks, SessionState, Tracker, TrackerBuilder, TrackingConfig, TrackingError,
};

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,beacon=debug";

/// Installs a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Falls back to [`DEFAULT_LOG_FILTER`] when `RUST_LOG` is unset. If a
/// global subscriber is already installed this does nothing.
///
/// # Errors
///
/// Returns an error if `RUST_LOG` is set but cannot be parsed.
pub fn init_tracing() -> anyhow::Result<()> {
    use anyhow::Context;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::try_new(&directives)
            .with_context(|| format!("invalid RUST_LOG directives {directives:?}"))?,
        Err(_) => EnvFilter::new(DEFAULT_LOG_FILTER),
    };

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if tracing_subscriber::registry().with(filter).with(fmt_layer).try_init().is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_twice_is_harmless() {
        init_tracing().unwrap();
        init_tracing().unwrap();
    }

    #[test]
    fn default_filter_parses() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
