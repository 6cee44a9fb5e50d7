//! Property-based tests for delivery ordering and loss.
//!
//! Whatever the collector answers, every enqueued event must end up either
//! delivered exactly once or dropped with a `failed` hook, and delivered
//! events must reach the collector in enqueue order.

use beacon_core::{Hook, JobKind};
use beacon_testing::{invariants, MockOutcome, TestEnv};
use proptest::prelude::*;

fn outcome_strategy() -> impl Strategy<Value = MockOutcome> {
    prop_oneof![
        4 => Just(MockOutcome::Success),
        2 => Just(MockOutcome::Network),
        1 => Just(MockOutcome::Timeout),
        2 => (500u16..504).prop_map(MockOutcome::ServerError),
        1 => (400u16..410).prop_map(MockOutcome::ClientError),
        1 => any::<bool>().prop_map(|retryable| MockOutcome::Rejected { retryable }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime should build")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_event_is_delivered_once_or_dropped(
        event_count in 1usize..12,
        script in prop::collection::vec(outcome_strategy(), 0..24),
        max_attempts in 1u32..4,
        restart_after in prop::option::of(0usize..8),
    ) {
        runtime().block_on(async {
            let mut env = TestEnv::builder().max_attempts(max_attempts).build().unwrap();
            for outcome in &script {
                env.events.push(outcome.clone());
            }
            let ids = env.enqueue_events(event_count);

            if let Some(cycles) = restart_after {
                for _ in 0..cycles {
                    env.run_cycle().await;
                }
                env.queue().persist_now().await.unwrap();
                env.reopen().await;
            }
            // every attempt consumes one scripted outcome, so this bounds the work
            for _ in 0..(event_count + script.len() + 1) {
                env.run_cycle().await;
            }

            let delivered = env.events.delivered();
            let dropped = env.recorder.payload_ids(Hook::Failed);
            let remaining = env.pending_ids(JobKind::Tracking);
            prop_assert!(remaining.is_empty(), "{} events still pending", remaining.len());

            invariants::check_no_loss(&ids, &delivered, &dropped)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            invariants::check_fifo(&ids, &delivered)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn offline_periods_never_lose_events(
        event_count in 1usize..10,
        toggles in prop::collection::vec(any::<bool>(), 1..16),
    ) {
        runtime().block_on(async {
            let env = TestEnv::builder().offline().build().unwrap();
            let ids = env.enqueue_events(event_count);

            for online in toggles {
                if online {
                    env.go_online();
                } else {
                    env.go_offline();
                }
                env.run_cycle().await;
            }
            env.go_online();
            env.drain().await.unwrap();

            prop_assert_eq!(env.events.delivered(), ids);
            prop_assert_eq!(env.recorder.count(Hook::Failed), 0);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
