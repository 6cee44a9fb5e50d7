//! Test data builders with sensible defaults.

use beacon_core::{Event, Properties, Scalar, VisitId, VisitRecord};

/// Fixed timestamp used by fixtures, 2023-11-14T22:13:20Z.
pub const FIXTURE_TIMESTAMP: f64 = 1_700_000_000.0;

/// Builder for tracking events.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    name: String,
    properties: Properties,
    timestamp: f64,
    visit_id: Option<VisitId>,
    user_id: Option<String>,
}

impl EventBuilder {
    /// Starts an event named `name` with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Properties::new(),
            timestamp: FIXTURE_TIMESTAMP,
            visit_id: None,
            user_id: None,
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Stamps the event with a visit.
    #[must_use]
    pub fn visit(mut self, visit_id: VisitId) -> Self {
        self.visit_id = Some(visit_id);
        self
    }

    /// Stamps the event with a user.
    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Builds the event with a fresh id.
    pub fn build(self) -> Event {
        Event::new(self.name, self.properties, self.timestamp)
            .with_visit(self.visit_id)
            .with_user(self.user_id)
    }

    /// Builds `count` events named `{prefix}_{n}` one second apart.
    pub fn batch(prefix: &str, count: usize) -> Vec<Event> {
        (0..count)
            .map(|n| {
                Self::new(format!("{prefix}_{n}"))
                    .property("sequence", i64::try_from(n).unwrap_or(i64::MAX))
                    .timestamp(FIXTURE_TIMESTAMP + n as f64)
                    .build()
            })
            .collect()
    }
}

/// Builder for visit records.
#[derive(Debug, Clone)]
pub struct VisitBuilder {
    id: VisitId,
    visitor_id: String,
    user_id: Option<String>,
    params: Properties,
}

impl VisitBuilder {
    /// Starts a visit with a fresh id for visitor `device-test`.
    pub fn new() -> Self {
        Self {
            id: VisitId::new(),
            visitor_id: "device-test".to_string(),
            user_id: None,
            params: Properties::new(),
        }
    }

    /// Sets the visit id.
    #[must_use]
    pub fn id(mut self, id: VisitId) -> Self {
        self.id = id;
        self
    }

    /// Sets the visitor id.
    #[must_use]
    pub fn visitor(mut self, visitor_id: impl Into<String>) -> Self {
        self.visitor_id = visitor_id.into();
        self
    }

    /// Sets the user id.
    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Adds an extra param.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Builds the visit record.
    pub fn build(self) -> VisitRecord {
        VisitRecord::new(self.id, self.visitor_id, self.user_id, self.params)
    }
}

impl Default for VisitBuilder {
    fn default() -> Self {
        Self::new()
    }
}
