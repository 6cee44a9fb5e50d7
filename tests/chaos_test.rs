//! Chaos tests for delivery resilience.
//!
//! These run a live tracker while connectivity flaps and the collector
//! fails intermittently, then check that every event arrived once and in
//! order.

use std::time::Duration;

use anyhow::Result;
use beacon::{Hook, Properties, TrackingConfig};
use beacon_testing::{invariants, MockOutcome, TestEnv};

fn fast_config() -> TrackingConfig {
    TrackingConfig {
        visitor_id: Some("device-chaos".to_string()),
        active_interval_ms: 2,
        idle_interval_ms: 10,
        visit_grace_ms: 0,
        shutdown_timeout_ms: 2_000,
        ..TrackingConfig::default()
    }
}

/// Connectivity toggling while events are tracked loses nothing.
#[tokio::test]
async fn flapping_connectivity() -> Result<()> {
    let env = TestEnv::builder().real_clock().build()?;
    let tracker = env.tracker_builder(fast_config()).build()?;
    tracker.init().await?;

    let mut ids = Vec::new();
    for n in 0..20 {
        if n % 3 == 0 {
            env.connectivity.go_offline();
        } else {
            env.connectivity.go_online();
        }
        ids.push(tracker.track(format!("flap_{n}"), Properties::new()).id.0);
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    env.connectivity.go_online();
    env.recorder.wait_for(Hook::Succeeded, 21).await?;

    let delivered = env.events.delivered();
    invariants::check_no_duplicates(&delivered)?;
    invariants::check_fifo(&ids, &delivered)?;
    assert_eq!(delivered, ids);
    assert_eq!(env.recorder.count(Hook::Failed), 0);

    tracker.shutdown().await?;
    Ok(())
}

/// Transient collector failures only delay delivery.
#[tokio::test]
async fn intermittent_collector_failures() -> Result<()> {
    let env = TestEnv::builder().real_clock().build()?;
    for outcome in [
        MockOutcome::Network,
        MockOutcome::ServerError(503),
        MockOutcome::Success,
        MockOutcome::Timeout,
        MockOutcome::Rejected { retryable: true },
        MockOutcome::Success,
        MockOutcome::ServerError(500),
        MockOutcome::Network,
    ] {
        env.events.push(outcome);
    }
    env.visits.push(MockOutcome::ServerError(502));

    let tracker = env.tracker_builder(fast_config()).build()?;
    tracker.init().await?;
    let ids: Vec<_> =
        (0..10).map(|n| tracker.track(format!("step_{n}"), Properties::new()).id.0).collect();
    env.recorder.wait_for(Hook::Succeeded, 11).await?;

    let delivered = env.events.delivered();
    invariants::check_no_loss(&ids, &delivered, &[])?;
    invariants::check_fifo(&ids, &delivered)?;
    assert_eq!(env.recorder.count(Hook::Failure), 7);
    assert_eq!(env.recorder.count(Hook::Failed), 0);

    tracker.shutdown().await?;
    Ok(())
}
