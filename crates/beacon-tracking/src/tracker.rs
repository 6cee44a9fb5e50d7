//! Tracking facade.
//!
//! [`Tracker`] is what application code talks to. `track` returns the
//! constructed event at once; whether and when it reaches the collector is
//! reported through the lifecycle hooks, never through a return value.

use std::sync::Arc;

use beacon_core::{
    Clock, Event, EventHandler, MulticastEventHandler, Properties, RealClock, VisitId, VisitRecord,
};
use beacon_delivery::{
    AlwaysOnline, ConnectivityMonitor, DeliveryQueue, FileSnapshotStore, QueueStats, Sink,
    SnapshotStore, TrackPosts, VisitGate,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::TrackingConfig,
    error::Result,
    hooks::LifecycleHooks,
    sanitize::sanitize_properties,
    session::{SessionState, VisitCoordinator},
};

/// Builder wiring configuration and platform integrations into a
/// [`Tracker`].
///
/// Every integration has a default: a file store under the configured
/// directory, a monitor that is always online, the real clock and no hooks.
pub struct TrackerBuilder {
    config: TrackingConfig,
    hooks: LifecycleHooks,
    posts: TrackPosts,
    sink: Option<Sink>,
    store: Option<Arc<dyn SnapshotStore>>,
    monitor: Option<Arc<dyn ConnectivityMonitor>>,
    clock: Option<Arc<dyn Clock>>,
    subscribers: Vec<Arc<dyn EventHandler>>,
}

impl TrackerBuilder {
    /// Starts a builder from `config`.
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            hooks: LifecycleHooks::new(),
            posts: TrackPosts::default(),
            sink: None,
            store: None,
            monitor: None,
            clock: None,
            subscribers: Vec::new(),
        }
    }

    /// Lifecycle callbacks.
    #[must_use]
    pub fn hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Caller-supplied post functions. They take precedence over the
    /// configured URLs of the same lane.
    #[must_use]
    pub fn posts(mut self, posts: TrackPosts) -> Self {
        self.posts = posts;
        self
    }

    /// Fully resolved sink, bypassing post functions and URLs.
    #[must_use]
    pub fn sink(mut self, sink: Sink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Persistence adapter for the queue snapshot.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Platform connectivity monitor.
    #[must_use]
    pub fn connectivity(mut self, monitor: Arc<dyn ConnectivityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Clock for timestamps and dispatch timing.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Extra observer of every lifecycle event, called after the hooks.
    #[must_use]
    pub fn subscriber(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.subscribers.push(handler);
        self
    }

    /// Validates the configuration and builds the tracker.
    ///
    /// A lane with neither a post function nor a URL is accepted; events on
    /// it stay queued and each attempt reports to the `error` hook.
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::ConfigurationError` for invalid values and
    /// `TrackingError::Delivery` for collector URLs that do not parse.
    pub fn build(self) -> Result<Tracker> {
        self.config.validate()?;
        let config = self.config;

        let sink = match self.sink {
            Some(sink) => sink,
            None => Sink::resolve(&self.posts, &config.track_urls, &config.to_client_config())?,
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileSnapshotStore::new(config.store_dir.clone())));
        let monitor = self.monitor.unwrap_or_else(|| Arc::new(AlwaysOnline::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(RealClock::new()));

        let mut handler = MulticastEventHandler::new();
        handler.add_subscriber(Arc::new(self.hooks));
        for subscriber in self.subscribers {
            handler.add_subscriber(subscriber);
        }

        let queue = DeliveryQueue::new(
            config.to_queue_config(),
            sink,
            store,
            monitor,
            clock.clone(),
            Arc::new(handler),
            VisitGate::new(config.is_track_visit),
        );

        let visitor_id = config.visitor_id.clone().unwrap_or_else(|| {
            let generated = Uuid::new_v4().to_string();
            debug!(visitor_id = %generated, "no visitor id configured, generated one");
            generated
        });
        let session = VisitCoordinator::new(
            queue.clone(),
            visitor_id,
            config.user_id.clone(),
            config.visit_params.clone(),
            config.is_track_visit,
        );

        Ok(Tracker { config, queue, session, clock, initialized: AsyncMutex::new(false) })
    }
}

impl std::fmt::Debug for TrackerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerBuilder")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .field("posts", &self.posts)
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

/// Entry point for application code.
#[derive(Debug)]
pub struct Tracker {
    config: TrackingConfig,
    queue: DeliveryQueue,
    session: VisitCoordinator,
    clock: Arc<dyn Clock>,
    initialized: AsyncMutex<bool>,
}

impl Tracker {
    /// Starts building a tracker from `config`.
    pub fn builder(config: TrackingConfig) -> TrackerBuilder {
        TrackerBuilder::new(config)
    }

    /// Restores persisted jobs, starts delivery and begins the first visit.
    ///
    /// Only the first call has an effect; later calls neither restart the
    /// lanes nor subscribe to connectivity again.
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::Delivery` if the lane workers cannot start.
    pub async fn init(&self) -> Result<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            debug!("tracker already initialized");
            return Ok(());
        }

        let restored = self.queue.restore().await;
        self.queue.start(self.config.intervals()).await?;
        let visit = self.session.start();
        *initialized = true;

        info!(
            restored,
            visit_id = ?visit.map(|record| record.id),
            online = self.queue.is_online(),
            "tracker initialized"
        );
        Ok(())
    }

    /// Whether [`init`](Self::init) has completed.
    pub async fn is_initialized(&self) -> bool {
        *self.initialized.lock().await
    }

    /// Records a named event.
    ///
    /// Property keys are sanitized; the event is stamped with a fresh id,
    /// the current time, visit and user, and queued for delivery. Works
    /// before `init`, in which case the event waits for the first visit.
    pub fn track(&self, name: impl Into<String>, properties: Properties) -> Event {
        let event = Event::new(name, sanitize_properties(properties), self.clock.timestamp());
        let event = self.session.stamp(event);
        self.queue.enqueue(event.clone());
        event
    }

    /// Begins a fresh visit, whether or not automatic visits are enabled.
    pub fn track_visit(&self) -> VisitRecord {
        self.session.begin_visit()
    }

    /// Adopts a caller-provided visit id.
    pub fn set_visit_id(&self, visit_id: VisitId) -> VisitRecord {
        self.session.set_visit_id(visit_id)
    }

    /// Replaces the user stamped on subsequent events and visits.
    pub fn set_user_id(&self, user_id: Option<String>) {
        self.session.set_user_id(user_id);
    }

    /// Id of the current visit.
    pub fn current_visit(&self) -> Option<VisitId> {
        self.session.current_visit()
    }

    /// Lifecycle state of the session.
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Identifier of this device or installation.
    pub fn visitor_id(&self) -> String {
        self.session.visitor_id()
    }

    /// Queue statistics.
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Underlying delivery queue.
    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Configuration the tracker was built with.
    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Delivers everything deliverable right now. Returns the number of
    /// deliveries made.
    pub async fn flush(&self) -> usize {
        self.queue.flush().await
    }

    /// Stops delivery and writes the final snapshot.
    ///
    /// Undelivered jobs stay persisted for the next launch. The tracker can
    /// be initialized again afterwards.
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::Delivery` if the workers did not stop in time
    /// or the final snapshot write failed.
    pub async fn shutdown(&self) -> Result<()> {
        let mut initialized = self.initialized.lock().await;
        *initialized = false;
        self.queue.stop().await?;
        info!(pending = self.queue.stats().pending(), "tracker shut down");
        Ok(())
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if self.queue.is_running() {
            debug!("tracker dropped while running, halting delivery lanes");
            self.queue.halt();
        }
    }
}
