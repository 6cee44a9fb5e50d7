//! Session and visit coordination.
//!
//! The coordinator owns the current visit. It enqueues one visit record per
//! visit and publishes the visit id to the delivery queue, which stamps
//! events tracked before any visit existed. Events tracked afterwards are
//! stamped at creation with whatever visit is current at that moment.

use std::fmt;

use beacon_core::{Event, Properties, VisitId, VisitRecord};
use beacon_delivery::DeliveryQueue;
use parking_lot::Mutex;
use tracing::info;

/// Lifecycle of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No visit assigned yet.
    Uninitialized,
    /// The first visit of this session is current.
    Active,
    /// A later visit replaced the first one.
    Reassigning,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Active => write!(f, "active"),
            Self::Reassigning => write!(f, "reassigning"),
        }
    }
}

#[derive(Debug)]
struct Session {
    state: SessionState,
    started: bool,
    visitor_id: String,
    user_id: Option<String>,
    visit_params: Properties,
    current: Option<VisitRecord>,
}

/// Owner of the current visit.
#[derive(Debug)]
pub struct VisitCoordinator {
    queue: DeliveryQueue,
    track_visits: bool,
    session: Mutex<Session>,
}

impl VisitCoordinator {
    /// Creates a coordinator feeding `queue`.
    ///
    /// With `track_visits` unset no visit is started automatically, and
    /// events carry no visit unless one is started explicitly.
    pub fn new(
        queue: DeliveryQueue,
        visitor_id: impl Into<String>,
        user_id: Option<String>,
        visit_params: Properties,
        track_visits: bool,
    ) -> Self {
        Self {
            queue,
            track_visits,
            session: Mutex::new(Session {
                state: SessionState::Uninitialized,
                started: false,
                visitor_id: visitor_id.into(),
                user_id,
                visit_params,
                current: None,
            }),
        }
    }

    /// Starts the session, beginning the first visit when automatic visits
    /// are enabled.
    ///
    /// Only the first call has an effect. Returns the visit begun, if any.
    pub fn start(&self) -> Option<VisitRecord> {
        {
            let mut session = self.session.lock();
            if session.started {
                return None;
            }
            session.started = true;
        }

        if self.track_visits && self.current_visit().is_none() {
            Some(self.begin_visit())
        } else {
            None
        }
    }

    /// Begins a fresh visit and makes it current.
    pub fn begin_visit(&self) -> VisitRecord {
        self.set_visit_id(VisitId::new())
    }

    /// Makes `visit_id` the current visit, enqueueing its visit record.
    ///
    /// Events already created keep their visit. Setting the current visit
    /// again returns its record without enqueueing a second one. When calls
    /// race, the queue is left publishing whichever visit ends up current.
    pub fn set_visit_id(&self, visit_id: VisitId) -> VisitRecord {
        let record = {
            let mut session = self.session.lock();
            if let Some(current) = session.current.as_ref().filter(|r| r.id == visit_id) {
                return current.clone();
            }

            let record = VisitRecord::new(
                visit_id,
                session.visitor_id.clone(),
                session.user_id.clone(),
                session.visit_params.clone(),
            );
            session.state = match session.state {
                SessionState::Uninitialized => SessionState::Active,
                SessionState::Active | SessionState::Reassigning => SessionState::Reassigning,
            };
            session.current = Some(record.clone());
            info!(visit_id = %visit_id, state = %session.state, "visit started");
            record
        };

        self.queue.enqueue(record.clone());

        let session = self.session.lock();
        if session.current.as_ref().is_some_and(|current| current.id == visit_id) {
            self.queue.assign_visit(visit_id);
        }
        record
    }

    /// Stamps `event` with the current visit and user.
    pub fn stamp(&self, event: Event) -> Event {
        let session = self.session.lock();
        let visit_id = session.current.as_ref().map(|record| record.id);
        event.with_visit(visit_id).with_user(session.user_id.clone())
    }

    /// Replaces the user id stamped on subsequent events and visits.
    pub fn set_user_id(&self, user_id: Option<String>) {
        self.session.lock().user_id = user_id;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.session.lock().state
    }

    /// Id of the current visit.
    pub fn current_visit(&self) -> Option<VisitId> {
        self.session.lock().current.as_ref().map(|record| record.id)
    }

    /// Identifier of this device or installation.
    pub fn visitor_id(&self) -> String {
        self.session.lock().visitor_id.clone()
    }

    /// Identifier of the signed-in user.
    pub fn user_id(&self) -> Option<String> {
        self.session.lock().user_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use beacon_core::{JobKind, NoOpEventHandler, Scalar, TestClock};
    use beacon_delivery::{
        storage::mock::MemorySnapshotStore, ManualConnectivity, QueueConfig, Sink, VisitGate,
    };

    use super::*;

    fn coordinator(track_visits: bool) -> VisitCoordinator {
        let queue = DeliveryQueue::new(
            QueueConfig::default(),
            Sink::default(),
            Arc::new(MemorySnapshotStore::new()),
            Arc::new(ManualConnectivity::new(false)),
            Arc::new(TestClock::new()),
            Arc::new(NoOpEventHandler::new()),
            VisitGate::new(track_visits),
        );
        let mut params = Properties::new();
        params.insert("platform".to_string(), Scalar::from("ios"));
        VisitCoordinator::new(queue, "device-1", None, params, track_visits)
    }

    #[test]
    fn start_begins_exactly_one_visit() {
        let coordinator = coordinator(true);
        assert_eq!(coordinator.state(), SessionState::Uninitialized);

        let visit = coordinator.start().unwrap();
        assert!(coordinator.start().is_none());

        assert_eq!(coordinator.state(), SessionState::Active);
        assert_eq!(coordinator.current_visit(), Some(visit.id));
        assert_eq!(visit.visitor_id, "device-1");
        assert_eq!(visit.extra_params.get("platform"), Some(&Scalar::from("ios")));
        assert_eq!(coordinator.queue.pending(JobKind::Visitor), 1);
        assert_eq!(coordinator.queue.visit_gate().current(), Some(visit.id));
    }

    #[test]
    fn concurrent_visits_publish_the_current_one() {
        for _ in 0..50 {
            let coordinator = coordinator(true);
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| coordinator.begin_visit());
                }
            });

            assert_eq!(coordinator.queue.visit_gate().current(), coordinator.current_visit());
            assert_eq!(coordinator.queue.pending(JobKind::Visitor), 4);
        }
    }

    #[test]
    fn start_without_automatic_visits_assigns_nothing() {
        let coordinator = coordinator(false);

        assert!(coordinator.start().is_none());
        assert_eq!(coordinator.state(), SessionState::Uninitialized);
        assert_eq!(coordinator.queue.pending(JobKind::Visitor), 0);
    }

    #[test]
    fn reassigning_keeps_stamped_events() {
        let coordinator = coordinator(true);
        let first = coordinator.start().unwrap();
        let early = coordinator.stamp(Event::new("early", Properties::new(), 1.0));

        let second = coordinator.begin_visit();
        let late = coordinator.stamp(Event::new("late", Properties::new(), 2.0));

        assert_eq!(coordinator.state(), SessionState::Reassigning);
        assert_eq!(early.visit_id, Some(first.id));
        assert_eq!(late.visit_id, Some(second.id));
        assert_eq!(coordinator.queue.pending(JobKind::Visitor), 2);
    }

    #[test]
    fn setting_the_current_visit_again_is_a_no_op() {
        let coordinator = coordinator(true);
        let visit = coordinator.start().unwrap();

        let again = coordinator.set_visit_id(visit.id);

        assert_eq!(again, visit);
        assert_eq!(coordinator.state(), SessionState::Active);
        assert_eq!(coordinator.queue.pending(JobKind::Visitor), 1);
    }

    #[test]
    fn user_id_flows_into_events_and_visits() {
        let coordinator = coordinator(true);
        coordinator.set_user_id(Some("user-7".to_string()));

        let visit = coordinator.start().unwrap();
        let event = coordinator.stamp(Event::new("click", Properties::new(), 1.0));

        assert_eq!(visit.user_id.as_deref(), Some("user-7"));
        assert_eq!(event.user_id.as_deref(), Some("user-7"));
    }
}
