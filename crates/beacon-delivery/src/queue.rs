//! Persistent, connectivity-gated delivery queue.
//!
//! The queue owns two sequential lanes, one for visit records and one for
//! tracking events. Each dispatch cycle attempts at most one delivery per
//! lane, and only while connectivity is up. Every mutation marks the
//! in-memory state dirty and the snapshot is written after the mutation it
//! reflects, so a crash can re-deliver a job but never report an
//! undelivered one as done.
//!
//! # Delivery lifecycle
//!
//! 1. **Enqueue** - duplicate ids are rejected, `started` fires
//! 2. **Gate** - offline lanes, paused lanes and events whose visit is not
//!    yet known server-side are held
//! 3. **Attempt** - the head job is moved in flight and handed to the lane's
//!    transport under a time ceiling
//! 4. **Settle** - success confirms and persists before `succeeded` fires;
//!    failures requeue at the head or drop per the retry policy

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use beacon_core::{
    Clock, ErrorCategory, ErrorReport, EventHandler, Job, JobKind, LifecycleEvent, Payload,
    QueueSnapshot, VisitId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    client::{DeliveryRequest, Transport},
    connectivity::{ConnectivityCell, ConnectivityMonitor},
    error::{DeliveryError, Result},
    retry::{IntervalPolicy, RetryContext, RetryDecision, RetryPolicy},
    sink::Sink,
    storage::SnapshotStore,
    visit_gate::{VisitGate, VisitResolution},
    worker_pool::LanePool,
};

/// Key the snapshot is stored under unless configured otherwise.
pub const DEFAULT_SNAPSHOT_KEY: &str = "beacon.queue";

/// Configuration for the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Persistence key of the queue snapshot.
    pub snapshot_key: String,

    /// Retry policy for failed attempts.
    pub retry_policy: RetryPolicy,

    /// Polling intervals of the lane workers.
    pub intervals: IntervalPolicy,

    /// Ceiling on a single delivery attempt.
    pub delivery_timeout: Duration,

    /// How long the tracking lane waits for a visit after connectivity
    /// returns.
    pub visit_grace: Duration,

    /// Number of confirmed ids remembered for duplicate detection.
    pub confirmed_capacity: usize,

    /// Maximum time to wait for lane workers on stop.
    pub shutdown_timeout: Duration,

    /// Pins connectivity to offline whatever the monitor reports.
    pub offline_mode: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            snapshot_key: DEFAULT_SNAPSHOT_KEY.to_string(),
            retry_policy: RetryPolicy::default(),
            intervals: IntervalPolicy::default(),
            delivery_timeout: Duration::from_secs(10),
            visit_grace: Duration::from_secs(1),
            confirmed_capacity: 1000,
            shutdown_timeout: Duration::from_secs(5),
            offline_mode: false,
        }
    }
}

impl QueueConfig {
    /// Checks the configuration for values the queue cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` describing the first
    /// invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_key.trim().is_empty() {
            return Err(DeliveryError::configuration("snapshot key must not be empty"));
        }
        if self.retry_policy.max_attempts == 0 {
            return Err(DeliveryError::configuration("max attempts must be at least 1"));
        }
        validate_intervals(&self.intervals)?;
        if self.delivery_timeout.is_zero() {
            return Err(DeliveryError::configuration("delivery timeout must be positive"));
        }
        if self.confirmed_capacity == 0 {
            return Err(DeliveryError::configuration("confirmed capacity must be at least 1"));
        }
        Ok(())
    }
}

fn validate_intervals(intervals: &IntervalPolicy) -> Result<()> {
    if intervals.active.is_zero() || intervals.idle.is_zero() {
        return Err(DeliveryError::configuration("dispatch intervals must be positive"));
    }
    Ok(())
}

/// Whether an enqueue was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    /// The job joined its lane.
    Queued,
    /// A job with the same id is pending or was already confirmed.
    Duplicate,
}

/// Receipt returned by [`DeliveryQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    /// Payload id of the job.
    pub id: Uuid,
    /// Lane the job was routed to.
    pub kind: JobKind,
    /// Whether the job was accepted.
    pub status: EnqueueStatus,
}

impl JobHandle {
    /// Whether the job joined its lane.
    pub fn is_queued(&self) -> bool {
        self.status == EnqueueStatus::Queued
    }
}

/// Result of one dispatch attempt on a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Connectivity is down; nothing was attempted.
    Offline,
    /// The lane is empty.
    Idle,
    /// The lane already has a delivery in flight.
    Busy,
    /// The collector asked the lane to pause.
    Paused,
    /// The head event waits for its visit to reach the collector.
    AwaitingVisit,
    /// The lane has no sink; the head job stays queued.
    Deferred {
        /// Head job id.
        id: Uuid,
    },
    /// The head job was delivered and confirmed.
    Delivered {
        /// Delivered job id.
        id: Uuid,
    },
    /// The attempt failed and the job went back to the lane head.
    Requeued {
        /// Requeued job id.
        id: Uuid,
    },
    /// The attempt failed for good and the job was dropped.
    Dropped {
        /// Dropped job id.
        id: Uuid,
    },
}

impl DispatchOutcome {
    /// Whether a delivery attempt was made.
    pub fn attempted(&self) -> bool {
        matches!(self, Self::Delivered { .. } | Self::Requeued { .. } | Self::Dropped { .. })
    }

    /// Whether the head job left the queue.
    pub fn settled(&self) -> bool {
        matches!(self, Self::Delivered { .. } | Self::Dropped { .. })
    }
}

/// Outcomes of one cycle over both lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Visit record lane outcome.
    pub visitor: DispatchOutcome,
    /// Tracking event lane outcome.
    pub tracking: DispatchOutcome,
}

impl CycleReport {
    /// Outcome of one lane.
    pub fn outcome(&self, kind: JobKind) -> DispatchOutcome {
        match kind {
            JobKind::Visitor => self.visitor,
            JobKind::Tracking => self.tracking,
        }
    }

    /// Whether any lane settled its head job.
    pub fn made_progress(&self) -> bool {
        self.visitor.settled() || self.tracking.settled()
    }
}

/// Statistics for queue monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs accepted since construction.
    pub enqueued: u64,
    /// Successful deliveries.
    pub delivered: u64,
    /// Failed attempts (will retry or were dropped).
    pub failed_attempts: u64,
    /// Jobs dropped after a terminal failure.
    pub permanent_failures: u64,
    /// Duplicate ids reported.
    pub duplicates: u64,
    /// Visit records waiting, including one in flight.
    pub pending_visitor: usize,
    /// Tracking events waiting, including one in flight.
    pub pending_tracking: usize,
    /// Deliveries currently in flight.
    pub in_flight: usize,
    /// Whether dispatch currently sees connectivity.
    pub online: bool,
    /// Whether lane workers are running.
    pub running: bool,
}

impl QueueStats {
    /// Jobs waiting across both lanes.
    pub fn pending(&self) -> usize {
        self.pending_visitor + self.pending_tracking
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: u64,
    delivered: u64,
    failed_attempts: u64,
    permanent_failures: u64,
    duplicates: u64,
}

#[derive(Debug, Default)]
struct Lane {
    pending: VecDeque<Job>,
    in_flight: Option<Job>,
    paused_until: Option<Instant>,
}

impl Lane {
    fn len(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some())
    }

    /// Jobs in dispatch order, the in-flight one first.
    fn jobs(&self) -> Vec<Job> {
        self.in_flight.iter().chain(&self.pending).cloned().collect()
    }

    fn holds_visit(&self, visit_id: VisitId) -> bool {
        self.in_flight
            .iter()
            .chain(&self.pending)
            .any(|job| job.payload.as_visit().is_some_and(|visit| visit.id == visit_id))
    }

    fn stamp_unassigned(&mut self, visit_id: VisitId) -> usize {
        let mut stamped = 0;
        for job in &mut self.pending {
            if let Payload::Tracking(event) = &mut job.payload {
                if event.visit_id.is_none() {
                    event.visit_id = Some(visit_id);
                    stamped += 1;
                }
            }
        }
        stamped
    }

    /// Removes the job from flight, or from the pending jobs if a stop moved
    /// it back while its attempt was running.
    fn finish(&mut self, id: Uuid) {
        if self.in_flight.as_ref().is_some_and(|job| job.id() == id) {
            self.in_flight = None;
        } else {
            self.pending.retain(|job| job.id() != id);
        }
    }
}

/// Bounded set of recently confirmed ids, evicting the oldest first.
#[derive(Debug)]
struct ConfirmedSet {
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
    capacity: usize,
}

impl ConfirmedSet {
    fn new(capacity: usize) -> Self {
        Self { order: VecDeque::new(), ids: HashSet::new(), capacity: capacity.max(1) }
    }

    fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    /// Returns `false` if the id was already present.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

#[derive(Debug)]
struct QueueState {
    visitor: Lane,
    tracking: Lane,
    live_ids: HashSet<Uuid>,
    confirmed: ConfirmedSet,
    counters: Counters,
    dirty: bool,
}

impl QueueState {
    fn new(confirmed_capacity: usize) -> Self {
        Self {
            visitor: Lane::default(),
            tracking: Lane::default(),
            live_ids: HashSet::new(),
            confirmed: ConfirmedSet::new(confirmed_capacity),
            counters: Counters::default(),
            dirty: false,
        }
    }

    fn lane(&self, kind: JobKind) -> &Lane {
        match kind {
            JobKind::Visitor => &self.visitor,
            JobKind::Tracking => &self.tracking,
        }
    }

    fn lane_mut(&mut self, kind: JobKind) -> &mut Lane {
        match kind {
            JobKind::Visitor => &mut self.visitor,
            JobKind::Tracking => &mut self.tracking,
        }
    }

    fn is_known(&self, id: &Uuid) -> bool {
        self.live_ids.contains(id) || self.confirmed.contains(id)
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::new(self.visitor.jobs(), self.tracking.jobs())
    }

    /// Whether the tracking head may go out now.
    ///
    /// Events tracked before any visit existed are stamped with the visit
    /// once it is assigned. An event never overtakes the visit record it
    /// belongs to, unless visit records have no route and so never leave
    /// the visitor lane.
    fn tracking_head_ready(&mut self, gate: &VisitGate, visits_routed: bool) -> bool {
        let head_unassigned = self
            .tracking
            .pending
            .front()
            .and_then(|job| job.payload.as_event())
            .is_some_and(|event| event.visit_id.is_none());

        if head_unassigned {
            match gate.resolve() {
                VisitResolution::Assigned(visit_id) => {
                    let stamped = self.tracking.stamp_unassigned(visit_id);
                    debug!(visit_id = %visit_id, stamped, "stamped held events with visit");
                    self.dirty = true;
                },
                VisitResolution::Pending => return false,
                VisitResolution::Untracked => {},
            }
        }

        let head_visit = self
            .tracking
            .pending
            .front()
            .and_then(|job| job.payload.as_event())
            .and_then(|event| event.visit_id);
        match head_visit {
            Some(visit_id) => !(visits_routed && self.visitor.holds_visit(visit_id)),
            None => true,
        }
    }

    /// Moves the lane head in flight.
    fn claim(&mut self, kind: JobKind) -> Option<Job> {
        let lane = self.lane_mut(kind);
        let job = lane.pending.pop_front()?;
        lane.in_flight = Some(job.clone());
        Some(job)
    }
}

#[derive(Debug)]
struct QueueInner {
    config: QueueConfig,
    sink: Sink,
    store: Arc<dyn SnapshotStore>,
    monitor: Arc<dyn ConnectivityMonitor>,
    connectivity: ConnectivityCell,
    clock: Arc<dyn Clock>,
    event_handler: Arc<dyn EventHandler>,
    visit_gate: VisitGate,
    state: Mutex<QueueState>,
    persist_lock: tokio::sync::Mutex<()>,
    wake: [Notify; 2],
    runner: tokio::sync::Mutex<Option<LanePool>>,
    running: AtomicBool,
}

/// Local, persistent, retrying delivery queue.
///
/// Cheap to clone; clones share the same queue.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
}

impl DeliveryQueue {
    /// Creates a queue. Nothing is restored or started yet.
    pub fn new(
        config: QueueConfig,
        sink: Sink,
        store: Arc<dyn SnapshotStore>,
        monitor: Arc<dyn ConnectivityMonitor>,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
        visit_gate: VisitGate,
    ) -> Self {
        let connectivity = ConnectivityCell::new(monitor.current_state(), config.offline_mode);
        let state = Mutex::new(QueueState::new(config.confirmed_capacity));

        Self {
            inner: Arc::new(QueueInner {
                config,
                sink,
                store,
                monitor,
                connectivity,
                clock,
                event_handler,
                visit_gate,
                state,
                persist_lock: tokio::sync::Mutex::new(()),
                wake: [Notify::new(), Notify::new()],
                runner: tokio::sync::Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Visit gate consulted by the tracking lane.
    pub fn visit_gate(&self) -> &VisitGate {
        &self.inner.visit_gate
    }

    /// Clock driving timestamps and lane timing.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn monitor(&self) -> &Arc<dyn ConnectivityMonitor> {
        &self.inner.monitor
    }

    /// Whether dispatch currently sees connectivity.
    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// Whether lane workers are running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Records a connectivity change.
    ///
    /// Called by the connectivity subscription while the queue runs; embedders
    /// driving dispatch by hand call it themselves. Returns `true` when
    /// connectivity was restored, in which case sleeping lanes are woken.
    pub fn set_connectivity(&self, online: bool) -> bool {
        let restored = self.inner.connectivity.set(online, self.inner.clock.now());
        if restored {
            info!("connectivity restored, waking delivery lanes");
            self.wake_all();
        } else if !online {
            debug!("connectivity lost");
        }
        restored
    }

    /// Publishes the visit subsequent events belong to.
    ///
    /// When events are held for want of a visit, those already queued are
    /// stamped with this one before it becomes visible to dispatch.
    pub fn assign_visit(&self, visit_id: VisitId) {
        let gate = &self.inner.visit_gate;
        if gate.expects_visit() {
            let mut state = self.inner.state.lock();
            let stamped = state.tracking.stamp_unassigned(visit_id);
            if stamped > 0 {
                debug!(visit_id = %visit_id, stamped, "stamped held events with visit");
                state.dirty = true;
            }
        }
        gate.assign(visit_id);
        self.wake(JobKind::Tracking);
    }

    /// Adds a payload to its lane.
    ///
    /// Never blocks on I/O. The snapshot write is spawned on the current
    /// tokio runtime if there is one, and otherwise happens on the next
    /// dispatch cycle or [`persist_now`](Self::persist_now).
    pub fn enqueue(&self, payload: impl Into<Payload>) -> JobHandle {
        let job = Job::new(payload);
        let id = job.id();
        let kind = job.kind();

        let duplicate = {
            let mut state = self.inner.state.lock();
            if state.is_known(&id) {
                state.counters.duplicates += 1;
                true
            } else {
                state.live_ids.insert(id);
                state.lane_mut(kind).pending.push_back(job.clone());
                state.counters.enqueued += 1;
                state.dirty = true;
                false
            }
        };

        if duplicate {
            self.report_error(Some(job.payload), &DeliveryError::DuplicateId { id });
            return JobHandle { id, kind, status: EnqueueStatus::Duplicate };
        }

        debug!(payload_id = %id, lane = %kind, "job enqueued");
        self.emit(LifecycleEvent::Started { payload: job.payload });
        self.schedule_persist();
        self.wake(kind);

        JobHandle { id, kind, status: EnqueueStatus::Queued }
    }

    /// Restores jobs persisted by an earlier process.
    ///
    /// Restored jobs go ahead of anything enqueued since construction; ids
    /// already known are skipped. An unreadable or undecodable snapshot is
    /// reported to the `error` hook and treated as empty. Returns the
    /// number of restored jobs.
    pub async fn restore(&self) -> usize {
        let key = &self.inner.config.snapshot_key;
        let blob = match self.inner.store.read(key).await {
            Ok(blob) => blob,
            Err(error) => {
                warn!(error = %error, "failed to read queue snapshot, starting empty");
                self.report_error(None, &error);
                None
            },
        };
        let Some(blob) = blob else {
            debug!("no queue snapshot to restore");
            return 0;
        };

        let snapshot = match QueueSnapshot::decode(&blob) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                let error =
                    DeliveryError::persistence(format!("unreadable queue snapshot: {error}"));
                warn!(error = %error, "discarding queue snapshot");
                self.report_error(None, &error);
                return 0;
            },
        };

        let mut restored = 0;
        {
            let mut state = self.inner.state.lock();
            for kind in JobKind::ALL {
                let mut merged = VecDeque::new();
                for job in snapshot.lane(kind) {
                    let id = job.id();
                    if state.is_known(&id) {
                        debug!(payload_id = %id, "skipping already known job in snapshot");
                        continue;
                    }
                    state.live_ids.insert(id);
                    merged.push_back(job.clone());
                    restored += 1;
                }
                let lane = state.lane_mut(kind);
                merged.extend(lane.pending.drain(..));
                lane.pending = merged;
            }
            if restored > 0 {
                state.dirty = true;
            }
        }

        info!(restored, "restored queue snapshot");
        self.wake_all();
        restored
    }

    /// Attempts delivery of the head job of one lane.
    ///
    /// Failures never surface as errors here; they are reported through
    /// the lifecycle hooks and reflected in the outcome.
    pub async fn dispatch_once(&self, kind: JobKind) -> DispatchOutcome {
        if !self.is_online() {
            return DispatchOutcome::Offline;
        }

        let now = self.inner.clock.now();
        let in_grace = kind == JobKind::Tracking && self.in_visit_grace(now);
        let transport = self.inner.sink.transport_for(kind);
        let visits_routed = self.inner.sink.transport_for(JobKind::Visitor).is_some();

        let job = {
            let mut state = self.inner.state.lock();
            let lane = state.lane_mut(kind);
            if lane.in_flight.is_some() {
                return DispatchOutcome::Busy;
            }
            if lane.pending.is_empty() {
                return DispatchOutcome::Idle;
            }
            if let Some(until) = lane.paused_until {
                if now < until {
                    return DispatchOutcome::Paused;
                }
                lane.paused_until = None;
            }
            if transport.is_none() {
                let Some(head) = state.lane(kind).pending.front().map(|job| job.payload.clone())
                else {
                    return DispatchOutcome::Idle;
                };
                drop(state);
                let id = head.id();
                self.report_error(Some(head), &DeliveryError::MissingSink { kind });
                return DispatchOutcome::Deferred { id };
            }
            if kind == JobKind::Tracking
                && (in_grace || !state.tracking_head_ready(&self.inner.visit_gate, visits_routed))
            {
                return DispatchOutcome::AwaitingVisit;
            }
            match state.claim(kind) {
                Some(job) => job,
                None => return DispatchOutcome::Idle,
            }
        };

        self.attempt(kind, transport, job).await
    }

    /// Runs one dispatch cycle: the visitor lane first, then tracking.
    pub async fn run_cycle(&self) -> CycleReport {
        let visitor = self.dispatch_once(JobKind::Visitor).await;
        let tracking = self.dispatch_once(JobKind::Tracking).await;
        self.persist_if_dirty().await;
        CycleReport { visitor, tracking }
    }

    /// Runs dispatch cycles until no lane settles its head job. Returns the
    /// number of deliveries made.
    pub async fn flush(&self) -> usize {
        let mut delivered = 0;
        loop {
            let report = self.run_cycle().await;
            delivered += [report.visitor, report.tracking]
                .iter()
                .filter(|outcome| matches!(outcome, DispatchOutcome::Delivered { .. }))
                .count();
            if !report.made_progress() {
                break;
            }
        }
        delivered
    }

    /// Writes the snapshot now, whether or not anything changed.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::PersistenceError` if the store rejects the
    /// write. The failure is also reported to the `error` hook and the
    /// state stays dirty for the next cycle.
    pub async fn persist_now(&self) -> Result<()> {
        match self.write_snapshot(true).await {
            Ok(_) => Ok(()),
            Err(error) => {
                self.report_error(None, &error);
                Err(error)
            },
        }
    }

    /// Writes the snapshot if anything changed since the last write.
    pub(crate) async fn persist_if_dirty(&self) {
        if let Err(error) = self.write_snapshot(false).await {
            warn!(error = %error, "queue snapshot write failed, will retry next cycle");
            self.report_error(None, &error);
        }
    }

    /// Jobs of both lanes in dispatch order, in-flight jobs first.
    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Jobs waiting in one lane, including one in flight.
    pub fn pending(&self, kind: JobKind) -> usize {
        self.inner.state.lock().lane(kind).len()
    }

    /// Returns current queue statistics.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let counters = &state.counters;
        QueueStats {
            enqueued: counters.enqueued,
            delivered: counters.delivered,
            failed_attempts: counters.failed_attempts,
            permanent_failures: counters.permanent_failures,
            duplicates: counters.duplicates,
            pending_visitor: state.visitor.len(),
            pending_tracking: state.tracking.len(),
            in_flight: usize::from(state.visitor.in_flight.is_some())
                + usize::from(state.tracking.in_flight.is_some()),
            online: self.is_online(),
            running: self.is_running(),
        }
    }

    /// Starts one worker per lane plus the connectivity subscription.
    ///
    /// Calling `start` on a running queue does nothing.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` for zero intervals.
    pub async fn start(&self, intervals: IntervalPolicy) -> Result<()> {
        validate_intervals(&intervals)?;

        let mut runner = self.inner.runner.lock().await;
        if runner.is_some() {
            debug!("delivery lanes already running");
            return Ok(());
        }

        let mut pool = LanePool::new(self.clone(), intervals);
        pool.spawn_workers();
        *runner = Some(pool);
        self.inner.running.store(true, Ordering::Release);

        info!(
            active = ?intervals.active,
            idle = ?intervals.idle,
            "delivery queue started"
        );
        Ok(())
    }

    /// Stops the lane workers and writes a final snapshot.
    ///
    /// Pending jobs are kept; a job whose attempt was still running goes
    /// back to the head of its lane.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if workers did not stop in
    /// time, or the persistence error of the final write.
    pub async fn stop(&self) -> Result<()> {
        let pool = self.inner.runner.lock().await.take();
        self.inner.running.store(false, Ordering::Release);

        let shutdown = match pool {
            Some(pool) => pool.shutdown_graceful(self.inner.config.shutdown_timeout).await,
            None => Ok(()),
        };

        self.requeue_in_flight();
        let persisted = self.persist_now().await;
        info!("delivery queue stopped");
        shutdown.and(persisted)
    }

    /// Signals lane workers to stop without waiting for them.
    pub fn halt(&self) {
        if let Ok(mut runner) = self.inner.runner.try_lock() {
            if let Some(pool) = runner.take() {
                pool.cancel();
            }
        }
        self.inner.running.store(false, Ordering::Release);
    }

    pub(crate) fn lane_wake(&self, kind: JobKind) -> &Notify {
        &self.inner.wake[lane_index(kind)]
    }

    fn wake(&self, kind: JobKind) {
        self.lane_wake(kind).notify_one();
    }

    fn wake_all(&self) {
        for kind in JobKind::ALL {
            self.wake(kind);
        }
    }

    fn in_visit_grace(&self, now: Instant) -> bool {
        if self.inner.visit_gate.current().is_some() {
            return false;
        }
        self.inner
            .connectivity
            .restored_at()
            .is_some_and(|at| now.saturating_duration_since(at) < self.inner.config.visit_grace)
    }

    async fn attempt(
        &self,
        kind: JobKind,
        transport: Option<&dyn Transport>,
        job: Job,
    ) -> DispatchOutcome {
        let attempt_number = job.attempt_count.saturating_add(1);
        let payload_id = job.id();

        debug!(payload_id = %payload_id, lane = %kind, attempt_number, "attempting delivery");

        let result = match (transport, job.payload.to_json()) {
            (None, _) => Err(DeliveryError::MissingSink { kind }),
            (_, Err(e)) => Err(DeliveryError::serialization(e.to_string())),
            (Some(transport), Ok(body)) => {
                let request = DeliveryRequest { payload_id, kind, attempt_number, body };
                self.send_with_timeout(transport, &request).await
            },
        };

        match result {
            Ok(_) => self.settle_delivered(kind, job, attempt_number).await,
            Err(error) => self.settle_failed(kind, job, attempt_number, error).await,
        }
    }

    async fn send_with_timeout(
        &self,
        transport: &dyn Transport,
        request: &DeliveryRequest,
    ) -> Result<Value> {
        let timeout = self.inner.config.delivery_timeout;
        match tokio::time::timeout(timeout, transport.send(request)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(DeliveryError::timeout(timeout)),
        }
    }

    async fn settle_delivered(
        &self,
        kind: JobKind,
        job: Job,
        attempt_number: u32,
    ) -> DispatchOutcome {
        let id = job.id();
        let already_confirmed = {
            let mut state = self.inner.state.lock();
            state.lane_mut(kind).finish(id);
            state.live_ids.remove(&id);
            let fresh = state.confirmed.insert(id);
            state.counters.delivered += 1;
            if !fresh {
                state.counters.duplicates += 1;
            }
            state.dirty = true;
            !fresh
        };

        if already_confirmed {
            self.report_error(Some(job.payload.clone()), &DeliveryError::DuplicateId { id });
        }

        self.persist_if_dirty().await;

        info!(payload_id = %id, lane = %kind, attempt_number, "payload delivered");
        self.emit(LifecycleEvent::Succeeded { payload: job.payload, attempt_number });
        DispatchOutcome::Delivered { id }
    }

    async fn settle_failed(
        &self,
        kind: JobKind,
        mut job: Job,
        attempt_number: u32,
        error: DeliveryError,
    ) -> DispatchOutcome {
        let id = job.id();
        let error = match error {
            DeliveryError::Timeout { .. } if !self.is_online() => {
                debug!(payload_id = %id, lane = %kind, "attempt timed out after going offline");
                DeliveryError::Offline
            },
            other => other,
        };

        let decision =
            RetryContext::new(attempt_number, &error, &self.inner.config.retry_policy).decide();
        let will_retry = matches!(decision, RetryDecision::Requeue { .. });
        let report = ErrorReport::new(ErrorCategory::from(&error), error.to_string(), will_retry);

        warn!(
            payload_id = %id,
            lane = %kind,
            attempt_number,
            error = %error,
            will_retry,
            "delivery attempt failed"
        );

        self.inner.state.lock().counters.failed_attempts += 1;
        self.emit(LifecycleEvent::Failure {
            payload: job.payload.clone(),
            attempt_number,
            error: report.clone(),
        });

        match decision {
            RetryDecision::Requeue { pause } => {
                {
                    let mut state = self.inner.state.lock();
                    let lane = state.lane_mut(kind);
                    lane.finish(id);
                    job.attempt_count = attempt_number;
                    lane.pending.push_front(job);
                    if let Some(pause) = pause {
                        lane.paused_until = Some(self.inner.clock.now() + pause);
                        debug!(lane = %kind, pause = ?pause, "lane paused");
                    }
                    state.dirty = true;
                }
                self.persist_if_dirty().await;
                DispatchOutcome::Requeued { id }
            },
            RetryDecision::GiveUp { reason } => {
                {
                    let mut state = self.inner.state.lock();
                    state.lane_mut(kind).finish(id);
                    state.live_ids.remove(&id);
                    state.counters.permanent_failures += 1;
                    state.dirty = true;
                }
                self.persist_if_dirty().await;

                error!(
                    payload_id = %id,
                    lane = %kind,
                    attempt_number,
                    reason = %reason,
                    "delivery failed"
                );
                self.emit(LifecycleEvent::Failed {
                    payload: job.payload,
                    attempt_number,
                    error: report,
                });
                DispatchOutcome::Dropped { id }
            },
        }
    }

    fn requeue_in_flight(&self) {
        let mut state = self.inner.state.lock();
        let mut moved = false;
        for kind in JobKind::ALL {
            let lane = state.lane_mut(kind);
            if let Some(job) = lane.in_flight.take() {
                debug!(payload_id = %job.id(), lane = %kind, "returning in-flight job to lane");
                lane.pending.push_front(job);
                moved = true;
            }
        }
        if moved {
            state.dirty = true;
        }
    }

    async fn write_snapshot(&self, force: bool) -> Result<bool> {
        let _guard = self.inner.persist_lock.lock().await;

        let blob = {
            let mut state = self.inner.state.lock();
            if !force && !state.dirty {
                return Ok(false);
            }
            state.dirty = false;
            state.snapshot().encode()
        };

        let result = match blob {
            Ok(blob) => self.inner.store.write(&self.inner.config.snapshot_key, blob).await,
            Err(e) => Err(DeliveryError::from(e)),
        };

        if let Err(error) = result {
            self.inner.state.lock().dirty = true;
            return Err(error);
        }
        Ok(true)
    }

    fn schedule_persist(&self) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let queue = self.clone();
            handle.spawn(async move { queue.persist_if_dirty().await });
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        self.inner.event_handler.handle_event(&event);
    }

    fn report_error(&self, payload: Option<Payload>, error: &DeliveryError) {
        warn!(
            payload_id = ?payload.as_ref().map(Payload::id),
            category = %ErrorCategory::from(error),
            error = %error,
            "delivery anomaly"
        );
        self.emit(LifecycleEvent::Error { payload, error: error.report() });
    }
}

const fn lane_index(kind: JobKind) -> usize {
    match kind {
        JobKind::Visitor => 0,
        JobKind::Tracking => 1,
    }
}
