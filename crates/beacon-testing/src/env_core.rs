//! Core TestEnv implementation: environment setup and queue control.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use beacon_core::{Clock, JobKind, Payload, RealClock};
use beacon_delivery::{
    storage::mock::MemorySnapshotStore, CycleReport, DeliveryQueue, IntervalPolicy, JobHandle,
    ManualConnectivity, QueueConfig, RetryPolicy, Sink, Transport, VisitGate,
};
use beacon_tracking::{TrackerBuilder, TrackingConfig};
use uuid::Uuid;

use crate::{EventBuilder, HookRecorder, MockTransport, TestClock, TestEnv};

/// Upper bound on cycles [`TestEnv::drain`] runs before giving up.
const MAX_DRAIN_CYCLES: usize = 1000;

/// Builder for configuring a [`TestEnv`].
pub struct TestEnvBuilder {
    config: QueueConfig,
    online: bool,
    track_visits: bool,
    real_clock: bool,
    event_sink: bool,
    visit_sink: bool,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            config: QueueConfig { visit_grace: Duration::ZERO, ..QueueConfig::default() },
            online: true,
            track_visits: false,
            real_clock: false,
            event_sink: true,
            visit_sink: true,
        }
    }
}

impl TestEnvBuilder {
    /// Creates a builder: online, no visit gating, no grace period and the
    /// deterministic clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole queue configuration.
    #[must_use]
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the attempt ceiling for retryable errors.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.retry_policy = RetryPolicy::with_max_attempts(max_attempts);
        self
    }

    /// Sets the wait for a visit after connectivity returns.
    #[must_use]
    pub fn visit_grace(mut self, grace: Duration) -> Self {
        self.config.visit_grace = grace;
        self
    }

    /// Sets how many confirmed ids are remembered.
    #[must_use]
    pub fn confirmed_capacity(mut self, capacity: usize) -> Self {
        self.config.confirmed_capacity = capacity;
        self
    }

    /// Starts with connectivity down.
    #[must_use]
    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    /// Holds tracking events until a visit is assigned.
    #[must_use]
    pub fn track_visits(mut self) -> Self {
        self.track_visits = true;
        self
    }

    /// Uses the real clock and millisecond dispatch intervals, for tests
    /// that run the lane workers.
    #[must_use]
    pub fn real_clock(mut self) -> Self {
        self.real_clock = true;
        self.config.intervals =
            IntervalPolicy::new(Duration::from_millis(5), Duration::from_millis(20));
        self.config.shutdown_timeout = Duration::from_secs(2);
        self
    }

    /// Leaves the tracking lane without a transport.
    #[must_use]
    pub fn without_event_sink(mut self) -> Self {
        self.event_sink = false;
        self
    }

    /// Leaves the visitor lane without a transport.
    #[must_use]
    pub fn without_visit_sink(mut self) -> Self {
        self.visit_sink = false;
        self
    }

    /// Builds the environment.
    ///
    /// # Errors
    ///
    /// Fails if the queue configuration does not validate.
    pub fn build(self) -> Result<TestEnv> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
            )
            .with_test_writer()
            .try_init();

        self.config.validate().context("invalid test queue configuration")?;

        let clock = TestClock::new();
        let queue_clock: Arc<dyn Clock> =
            if self.real_clock { Arc::new(RealClock::new()) } else { Arc::new(clock.clone()) };
        let connectivity = Arc::new(ManualConnectivity::new(self.online));
        let store = MemorySnapshotStore::new();
        let events = MockTransport::new();
        let visits = MockTransport::new();
        let recorder = HookRecorder::new();

        let sink = wire_sink(
            self.event_sink.then_some(&events),
            self.visit_sink.then_some(&visits),
        );
        let queue = DeliveryQueue::new(
            self.config.clone(),
            sink,
            Arc::new(store.clone()),
            connectivity.clone(),
            queue_clock.clone(),
            recorder.clone(),
            VisitGate::new(self.track_visits),
        );

        Ok(TestEnv {
            clock,
            connectivity,
            store,
            events,
            visits,
            recorder,
            queue_clock,
            config: self.config,
            track_visits: self.track_visits,
            wire_event_sink: self.event_sink,
            wire_visit_sink: self.visit_sink,
            queue,
        })
    }
}

fn wire_sink(events: Option<&MockTransport>, visits: Option<&MockTransport>) -> Sink {
    let route = |transport: &MockTransport| Arc::new(transport.clone()) as Arc<dyn Transport>;
    Sink::from_transports(events.map(route), visits.map(route))
}

impl TestEnv {
    /// Creates an environment with default settings.
    ///
    /// # Errors
    ///
    /// See [`TestEnvBuilder::build`].
    pub fn new() -> Result<Self> {
        TestEnvBuilder::new().build()
    }

    /// Starts configuring an environment.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::new()
    }

    /// Queue under test.
    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Clock handed to the queue.
    pub fn queue_clock(&self) -> Arc<dyn Clock> {
        self.queue_clock.clone()
    }

    /// Queue configuration in use.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Sink wired to the mock transports.
    pub fn sink(&self) -> Sink {
        wire_sink(
            self.wire_event_sink.then_some(&self.events),
            self.wire_visit_sink.then_some(&self.visits),
        )
    }

    fn new_queue(&self) -> DeliveryQueue {
        DeliveryQueue::new(
            self.config.clone(),
            self.sink(),
            Arc::new(self.store.clone()),
            self.connectivity.clone(),
            self.queue_clock.clone(),
            self.recorder.clone(),
            VisitGate::new(self.track_visits),
        )
    }

    /// Drops connectivity, both at the monitor and in the queue.
    pub fn go_offline(&self) {
        self.connectivity.go_offline();
        self.queue.set_connectivity(false);
    }

    /// Restores connectivity, both at the monitor and in the queue.
    pub fn go_online(&self) {
        self.connectivity.go_online();
        self.queue.set_connectivity(true);
    }

    /// Enqueues one payload.
    pub fn enqueue(&self, payload: impl Into<Payload>) -> JobHandle {
        self.queue.enqueue(payload)
    }

    /// Enqueues `count` fixture events and returns their ids in order.
    pub fn enqueue_events(&self, count: usize) -> Vec<Uuid> {
        EventBuilder::batch("event", count)
            .into_iter()
            .map(|event| self.queue.enqueue(event).id)
            .collect()
    }

    /// Runs one dispatch cycle over both lanes.
    pub async fn run_cycle(&self) -> CycleReport {
        self.queue.run_cycle().await
    }

    /// Runs cycles until one attempts no delivery. Returns the cycles run.
    ///
    /// Failed attempts keep the loop going, so scripted failures are worked
    /// through; paused, offline, held and unrouted lanes end it.
    ///
    /// # Errors
    ///
    /// Fails if the queue keeps attempting deliveries for too many cycles.
    pub async fn drain(&self) -> Result<usize> {
        for cycle in 1..=MAX_DRAIN_CYCLES {
            let report = self.run_cycle().await;
            if !report.visitor.attempted() && !report.tracking.attempted() {
                return Ok(cycle);
            }
        }
        bail!("queue still attempting deliveries after {MAX_DRAIN_CYCLES} cycles")
    }

    /// Ids pending on `kind`, head first.
    pub fn pending_ids(&self, kind: JobKind) -> Vec<Uuid> {
        self.queue.snapshot().lane(kind).iter().map(beacon_core::Job::id).collect()
    }

    /// Replaces the queue with a fresh one over the same store, as after a
    /// process restart, and restores it. Returns the jobs restored.
    ///
    /// Only what the old queue had written to the store survives.
    pub async fn reopen(&mut self) -> usize {
        self.queue.halt();
        self.queue = self.new_queue();
        self.queue.restore().await
    }

    /// Tracker builder wired to this environment's store, connectivity,
    /// clock, transports and recorder.
    pub fn tracker_builder(&self, config: TrackingConfig) -> TrackerBuilder {
        TrackerBuilder::new(config)
            .sink(self.sink())
            .store(Arc::new(self.store.clone()))
            .connectivity(self.connectivity.clone())
            .clock(self.queue_clock.clone())
            .subscriber(self.recorder.clone())
    }

    /// Stops any running lane workers and writes the final snapshot.
    ///
    /// # Errors
    ///
    /// Fails if the workers do not stop or the snapshot write fails.
    pub async fn shutdown(&self) -> Result<()> {
        self.queue.stop().await.context("failed to stop delivery queue")
    }
}

#[cfg(test)]
mod tests {
    use beacon_core::Hook;

    use super::*;
    use crate::MockOutcome;

    #[tokio::test]
    async fn default_env_delivers_fifo() -> Result<()> {
        let env = TestEnv::new()?;
        let ids = env.enqueue_events(3);

        env.drain().await?;

        assert_eq!(env.events.delivered(), ids);
        assert_eq!(env.recorder.payload_ids(Hook::Succeeded), ids);
        Ok(())
    }

    #[tokio::test]
    async fn reopen_restores_persisted_jobs() -> Result<()> {
        let mut env = TestEnv::builder().offline().build()?;
        let ids = env.enqueue_events(2);
        env.queue().persist_now().await?;

        let restored = env.reopen().await;

        assert_eq!(restored, 2);
        assert_eq!(env.pending_ids(JobKind::Tracking), ids);
        Ok(())
    }

    #[tokio::test]
    async fn missing_sink_keeps_events_queued() -> Result<()> {
        let env = TestEnv::builder().without_event_sink().build()?;
        env.events.set_fallback(MockOutcome::Network);
        let ids = env.enqueue_events(1);

        env.run_cycle().await;

        assert_eq!(env.pending_ids(JobKind::Tracking), ids);
        assert_eq!(env.events.request_count(), 0);
        assert_eq!(env.recorder.count(Hook::Error), 1);
        Ok(())
    }
}
