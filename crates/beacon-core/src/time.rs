//! Clock abstraction for timestamps and loop timing.
//!
//! Event timestamps, dispatch intervals and grace periods all read time
//! through [`Clock`] so tests can drive them deterministically.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Source of time for the tracker and the delivery lanes.
///
/// [`RealClock`] in production; [`TestClock`] where tests need to move time
/// by hand.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant used for pauses and grace windows.
    fn now(&self) -> Instant;

    /// Wall-clock time events are stamped with.
    fn now_system(&self) -> SystemTime;

    /// Waits between dispatch cycles.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Unix time in seconds with sub-second precision.
    fn timestamp(&self) -> f64 {
        self.now_system().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
    }
}

/// Wall clock with tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates the clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Hand-driven clock.
///
/// `sleep` advances the clock by the requested duration and yields instead
/// of waiting, so loops driven by this clock run as fast as the scheduler
/// lets them. Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct TestClock {
    advanced_ns: Arc<AtomicU64>,
    epoch_offset_ns: u64,
    origin: Instant,
}

impl TestClock {
    /// Starts at the current wall-clock time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Starts at `start`, so timestamps are predictable.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();

        Self {
            advanced_ns: Arc::new(AtomicU64::new(0)),
            epoch_offset_ns: saturating_nanos(since_epoch),
            origin: Instant::now(),
        }
    }

    /// Moves time forward for every clone of this clock.
    pub fn advance(&self, duration: Duration) {
        self.advanced_ns.fetch_add(saturating_nanos(duration), Ordering::AcqRel);
    }

    /// Total time advanced so far.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.advanced_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.epoch_offset_ns) + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
