//! Property-based tests for the persisted queue snapshot.
//!
//! A restarted process must resume with exactly the jobs it persisted, so
//! the snapshot codec has to be lossless for every payload the facade can
//! produce.

use beacon_core::{Event, Job, Properties, QueueSnapshot, Scalar, VisitId, VisitRecord};
use proptest::prelude::*;

fn scalar_strategy() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        Just(Scalar::Null),
        any::<bool>().prop_map(Scalar::Bool),
        any::<i64>().prop_map(Scalar::Integer),
        (-1.0e12f64..1.0e12).prop_map(Scalar::Float),
        "[a-zA-Z0-9 _!-]{0,24}".prop_map(Scalar::Text),
    ]
}

fn properties_strategy() -> impl Strategy<Value = Properties> {
    prop::collection::btree_map("[a-zA-Z0-9_]{1,12}", scalar_strategy(), 0..6)
}

fn event_job_strategy() -> impl Strategy<Value = Job> {
    (
        "[a-z_]{1,16}",                          // name
        properties_strategy(),                   // properties
        1.0e9f64..2.0e9,                         // timestamp
        prop::option::of(Just(()).prop_map(|()| VisitId::new())),
        prop::option::of("[a-z0-9-]{1,12}"),     // user_id
        0u32..1000,                              // attempt_count
    )
        .prop_map(|(name, properties, timestamp, visit_id, user_id, attempt_count)| {
            let event = Event::new(name, properties, timestamp)
                .with_visit(visit_id)
                .with_user(user_id);
            Job { attempt_count, ..Job::new(event) }
        })
}

fn visit_job_strategy() -> impl Strategy<Value = Job> {
    ("[a-z0-9-]{1,16}", prop::option::of("[a-z0-9-]{1,12}"), properties_strategy()).prop_map(
        |(visitor_id, user_id, extra)| {
            Job::new(VisitRecord::new(VisitId::new(), visitor_id, user_id, extra))
        },
    )
}

proptest! {
    #[test]
    fn snapshot_round_trips_losslessly(
        visitor in prop::collection::vec(visit_job_strategy(), 0..4),
        tracking in prop::collection::vec(event_job_strategy(), 0..16),
    ) {
        let snapshot = QueueSnapshot::new(visitor, tracking);
        let blob = snapshot.encode().unwrap();
        let decoded = QueueSnapshot::decode(&blob).unwrap();

        prop_assert_eq!(decoded, snapshot);
    }

    #[test]
    fn decode_never_panics_on_arbitrary_text(blob in ".{0,256}") {
        let _ = QueueSnapshot::decode(&blob);
    }
}
