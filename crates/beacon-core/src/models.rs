//! Tracking data model and strongly-typed identifiers.
//!
//! Defines tracking events, visit records and the queue job envelope that
//! wraps either of them for delivery. Identifiers are UUID newtypes so an
//! event id can never be passed where a visit id is expected.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed event identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Events are immutable
/// once created, and this ID follows them until their delivery is confirmed.
///
/// # Example
///
/// ```
/// use beacon_core::models::EventId;
/// let event_id = EventId::new();
/// println!("tracking event: {}", event_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed visit identifier.
///
/// A visit groups the events produced during one continuous usage period.
/// Every event is stamped with the visit id that was current when it was
/// tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitId(pub Uuid);

impl VisitId {
    /// Creates a new random visit ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VisitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VisitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for VisitId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Scalar property value.
///
/// Serialized as the bare JSON value. Integers are tried before floats so
/// `3` round-trips as an integer and `3.0` as a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// JSON `null`.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    Text(String),
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Event or visit properties keyed by name.
pub type Properties = BTreeMap<String, Scalar>;

/// A named tracking event.
///
/// Created by the tracking facade on every `track()` call. The visit id is
/// stamped at creation when a visit is active; events created before any
/// visit exists carry `None` until the delivery queue stamps them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique identifier, also used for deduplication.
    pub id: EventId,

    /// Visit this event belongs to.
    pub visit_id: Option<VisitId>,

    /// Application user identifier, if known.
    pub user_id: Option<String>,

    /// Unix time in seconds with sub-second precision.
    pub timestamp: f64,

    /// Event name.
    pub name: String,

    /// Event properties with sanitized keys.
    #[serde(default)]
    pub properties: Properties,
}

impl Event {
    /// Creates an event with a fresh id and no visit or user.
    pub fn new(name: impl Into<String>, properties: Properties, timestamp: f64) -> Self {
        Self {
            id: EventId::new(),
            visit_id: None,
            user_id: None,
            timestamp,
            name: name.into(),
            properties,
        }
    }

    /// Sets the visit this event belongs to.
    #[must_use]
    pub fn with_visit(mut self, visit_id: Option<VisitId>) -> Self {
        self.visit_id = visit_id;
        self
    }

    /// Sets the user this event belongs to.
    #[must_use]
    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// A visit record announcing a new usage period to the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    /// Visit identifier.
    pub id: VisitId,

    /// Identifier of the device or installation that produced the visit.
    pub visitor_id: String,

    /// Application user identifier, if known.
    pub user_id: Option<String>,

    /// Extra fields merged into the record body.
    #[serde(flatten)]
    pub extra_params: Properties,
}

impl VisitRecord {
    /// Field names that extra params may not override.
    pub const RESERVED_FIELDS: [&'static str; 3] = ["id", "visitorId", "userId"];

    /// Creates a visit record, dropping extra params that collide with the
    /// record's own fields.
    pub fn new(
        id: VisitId,
        visitor_id: impl Into<String>,
        user_id: Option<String>,
        mut extra_params: Properties,
    ) -> Self {
        extra_params.retain(|key, _| !Self::RESERVED_FIELDS.contains(&key.as_str()));
        Self { id, visitor_id: visitor_id.into(), user_id, extra_params }
    }
}

/// Delivery lane a job travels through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// Tracking events.
    Tracking,
    /// Visit records.
    Visitor,
}

impl JobKind {
    /// Both lanes, in dispatch priority order.
    pub const ALL: [Self; 2] = [Self::Visitor, Self::Tracking];
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tracking => write!(f, "tracking"),
            Self::Visitor => write!(f, "visitor"),
        }
    }
}

/// Content carried by a queue job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Payload {
    /// A tracking event.
    Tracking(Event),
    /// A visit record.
    Visitor(VisitRecord),
}

impl Payload {
    /// Identifier of the wrapped event or visit record.
    pub fn id(&self) -> Uuid {
        match self {
            Self::Tracking(event) => event.id.0,
            Self::Visitor(visit) => visit.id.0,
        }
    }

    /// Lane this payload is delivered through.
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Tracking(_) => JobKind::Tracking,
            Self::Visitor(_) => JobKind::Visitor,
        }
    }

    /// Returns the wrapped event, if this is a tracking payload.
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Tracking(event) => Some(event),
            Self::Visitor(_) => None,
        }
    }

    /// Returns the wrapped visit record, if this is a visitor payload.
    pub fn as_visit(&self) -> Option<&VisitRecord> {
        match self {
            Self::Visitor(visit) => Some(visit),
            Self::Tracking(_) => None,
        }
    }

    /// Renders the body sent to the collector.
    ///
    /// # Errors
    ///
    /// Returns error if a property value cannot be represented as JSON
    /// (non-finite floats).
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Tracking(event) => serde_json::to_value(event),
            Self::Visitor(visit) => serde_json::to_value(visit),
        }
    }
}

impl From<Event> for Payload {
    fn from(event: Event) -> Self {
        Self::Tracking(event)
    }
}

impl From<VisitRecord> for Payload {
    fn from(visit: VisitRecord) -> Self {
        Self::Visitor(visit)
    }
}

/// Queue-durable envelope around an event or visit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Wrapped event or visit record.
    pub payload: Payload,

    /// Delivery attempts made so far.
    #[serde(default)]
    pub attempt_count: u32,
}

impl Job {
    /// Wraps a payload in a job with no attempts.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self { payload: payload.into(), attempt_count: 0 }
    }

    /// Identifier of the wrapped payload.
    pub fn id(&self) -> Uuid {
        self.payload.id()
    }

    /// Lane this job is delivered through.
    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn event_serializes_with_camel_case_fields() {
        let visit_id = VisitId::new();
        let mut properties = Properties::new();
        properties.insert("plan".to_string(), Scalar::from("pro"));
        let event = Event::new("signup", properties, 1_700_000_000.25)
            .with_visit(Some(visit_id))
            .with_user(Some("u-1".to_string()));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["visitId"], json!(visit_id.0.to_string()));
        assert_eq!(value["userId"], json!("u-1"));
        assert_eq!(value["timestamp"], json!(1_700_000_000.25));
        assert_eq!(value["properties"]["plan"], json!("pro"));
    }

    #[test]
    fn scalar_integers_stay_integers() {
        let parsed: Properties =
            serde_json::from_value(json!({"a": 3, "b": 3.5, "c": null, "d": true})).unwrap();
        assert_eq!(parsed["a"], Scalar::Integer(3));
        assert_eq!(parsed["b"], Scalar::Float(3.5));
        assert_eq!(parsed["c"], Scalar::Null);
        assert_eq!(parsed["d"], Scalar::Bool(true));
    }

    #[test]
    fn visit_extra_params_are_flattened() {
        let mut extra = Properties::new();
        extra.insert("platform".to_string(), Scalar::from("ios"));
        let visit = VisitRecord::new(VisitId::new(), "device-1", None, extra);

        let value = serde_json::to_value(&visit).unwrap();
        assert_eq!(value["visitorId"], json!("device-1"));
        assert_eq!(value["platform"], json!("ios"));
        assert!(value.get("extraParams").is_none());
    }

    #[test]
    fn visit_extra_params_cannot_override_identity() {
        let mut extra = Properties::new();
        extra.insert("id".to_string(), Scalar::from("spoofed"));
        extra.insert("visitorId".to_string(), Scalar::from("spoofed"));
        extra.insert("screen".to_string(), Scalar::from("home"));
        let visit = VisitRecord::new(VisitId::new(), "device-1", None, extra);

        assert_eq!(visit.extra_params.len(), 1);
        assert!(visit.extra_params.contains_key("screen"));
    }

    #[test]
    fn job_reports_payload_identity() {
        let event = Event::new("click", Properties::new(), 1.0);
        let id = event.id.0;
        let job = Job::new(event);

        assert_eq!(job.id(), id);
        assert_eq!(job.kind(), JobKind::Tracking);
        assert_eq!(job.attempt_count, 0);
    }

    #[test]
    fn lane_priority_puts_visits_first() {
        assert_eq!(JobKind::ALL[0], JobKind::Visitor);
        assert_eq!(JobKind::Tracking.to_string(), "tracking");
    }
}
