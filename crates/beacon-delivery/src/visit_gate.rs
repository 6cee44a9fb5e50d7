//! Shared view of the current visit.
//!
//! The session coordinator writes the gate; the tracking lane reads it to
//! decide whether an event tracked before any visit existed can go out.

use std::sync::Arc;

use beacon_core::VisitId;
use parking_lot::RwLock;

/// What the tracking lane should do with an event that has no visit id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResolution {
    /// Stamp the event with this visit.
    Assigned(VisitId),
    /// A visit is expected but not yet assigned; hold the event.
    Pending,
    /// Automatic visits are disabled; deliver with a null visit.
    Untracked,
}

/// Visit cell shared between the session coordinator and the queue.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct VisitGate {
    inner: Arc<RwLock<GateState>>,
}

#[derive(Debug)]
struct GateState {
    current: Option<VisitId>,
    expects_visit: bool,
}

impl VisitGate {
    /// Creates a gate with no visit assigned.
    ///
    /// With `expects_visit` set, events without a visit are held until one
    /// is assigned.
    pub fn new(expects_visit: bool) -> Self {
        Self { inner: Arc::new(RwLock::new(GateState { current: None, expects_visit })) }
    }

    /// Creates a gate that never holds events.
    pub fn untracked() -> Self {
        Self::new(false)
    }

    /// Publishes the visit subsequent events belong to.
    pub fn assign(&self, visit_id: VisitId) {
        self.inner.write().current = Some(visit_id);
    }

    /// Currently assigned visit.
    pub fn current(&self) -> Option<VisitId> {
        self.inner.read().current
    }

    /// Whether events without a visit wait for one.
    pub fn expects_visit(&self) -> bool {
        self.inner.read().expects_visit
    }

    /// Resolves the visit for an event that carries none.
    ///
    /// Without automatic visits an event tracked outside any visit stays
    /// outside it, even if an explicit visit starts later.
    pub fn resolve(&self) -> VisitResolution {
        let state = self.inner.read();
        match (state.expects_visit, state.current) {
            (false, _) => VisitResolution::Untracked,
            (true, Some(visit_id)) => VisitResolution::Assigned(visit_id),
            (true, None) => VisitResolution::Pending,
        }
    }
}

impl Default for VisitGate {
    fn default() -> Self {
        Self::untracked()
    }
}
