//! End-to-end tests for complete tracking workflows.
//!
//! Runs the tracker against a wiremock collector with a file-backed queue
//! snapshot, covering visit ordering, offline periods, restarts and caller
//! post functions.

use std::{path::Path, sync::Arc};

use anyhow::Result;
use beacon::{
    delivery::ManualConnectivity, post_fn, Hook, PostError, Properties, Scalar, Tracker,
    TrackingConfig,
};
use beacon_testing::{
    http::{EVENTS_PATH, VISITS_PATH},
    HookRecorder, MockCollector,
};
use serde_json::{json, Value};

fn collector_config(collector: &MockCollector, store_dir: &Path) -> TrackingConfig {
    TrackingConfig {
        visitor_id: Some("device-e2e".to_string()),
        track_urls: collector.track_urls(),
        store_dir: store_dir.to_path_buf(),
        active_interval_ms: 5,
        idle_interval_ms: 20,
        visit_grace_ms: 0,
        shutdown_timeout_ms: 2_000,
        ..TrackingConfig::default()
    }
}

/// The golden path: one visit, then its events, all over HTTP.
#[tokio::test]
async fn golden_path_delivers_visit_then_events() -> Result<()> {
    let collector = MockCollector::start().await;
    let dir = tempfile::tempdir()?;
    let recorder = HookRecorder::new();

    let mut config = collector_config(&collector, dir.path());
    config.user_id = Some("user-42".to_string());
    config.visit_params = Properties::from([
        ("platform".to_string(), Scalar::from("ios")),
        ("visitorId".to_string(), Scalar::from("spoofed")),
    ]);
    let tracker = Tracker::builder(config).subscriber(recorder.clone()).build()?;

    tracker.init().await?;
    tracker.track("app_opened", Properties::new());
    tracker.track(
        "purchase",
        Properties::from([
            ("amount".to_string(), Scalar::from(19.99)),
            ("item id".to_string(), Scalar::from("sku-1")),
        ]),
    );
    recorder.wait_for(Hook::Succeeded, 3).await?;

    let visits = collector.received(VISITS_PATH).await?;
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0]["visitorId"], "device-e2e");
    assert_eq!(visits[0]["userId"], "user-42");
    assert_eq!(visits[0]["platform"], "ios");

    let events = collector.received(EVENTS_PATH).await?;
    assert_eq!(collector.received_event_names().await?, vec!["app_opened", "purchase"]);
    assert_eq!(events[1]["properties"], json!({"amount": 19.99, "itemid": "sku-1"}));
    assert!(events.iter().all(|event| event["visitId"] == visits[0]["id"]));
    assert!(events.iter().all(|event| event["userId"] == "user-42"));

    tracker.shutdown().await?;
    Ok(())
}

/// Events tracked offline survive a restart and go out once online.
#[tokio::test]
async fn offline_events_survive_a_restart() -> Result<()> {
    let collector = MockCollector::start().await;
    let dir = tempfile::tempdir()?;
    let connectivity = Arc::new(ManualConnectivity::new(false));

    let first = Tracker::builder(collector_config(&collector, dir.path()))
        .connectivity(connectivity.clone())
        .build()?;
    first.init().await?;
    for name in ["a", "b", "c"] {
        first.track(name, Properties::new());
    }
    first.shutdown().await?;
    drop(first);
    assert!(collector.received(EVENTS_PATH).await?.is_empty());

    connectivity.go_online();
    let recorder = HookRecorder::new();
    let second = Tracker::builder(collector_config(&collector, dir.path()))
        .connectivity(connectivity.clone())
        .subscriber(recorder.clone())
        .build()?;
    second.init().await?;
    recorder.wait_for(Hook::Succeeded, 5).await?;

    assert_eq!(collector.received_event_names().await?, vec!["a", "b", "c"]);
    assert_eq!(collector.received(VISITS_PATH).await?.len(), 2);
    assert_eq!(second.stats().pending(), 0);

    second.shutdown().await?;
    Ok(())
}

/// A collector outage delays delivery without reordering or losing events.
#[tokio::test]
async fn collector_outage_recovers_in_order() -> Result<()> {
    let collector = MockCollector::start().await;
    collector.fail_next(EVENTS_PATH, 3, 503).await;
    let dir = tempfile::tempdir()?;
    let recorder = HookRecorder::new();

    let tracker = Tracker::builder(collector_config(&collector, dir.path()))
        .subscriber(recorder.clone())
        .build()?;
    tracker.init().await?;
    for n in 0..4 {
        tracker.track(format!("step_{n}"), Properties::new());
    }
    recorder.wait_for(Hook::Succeeded, 5).await?;

    assert_eq!(
        collector.received_event_names().await?,
        vec!["step_0", "step_0", "step_0", "step_0", "step_1", "step_2", "step_3"]
    );
    assert_eq!(recorder.count(Hook::Failure), 3);
    assert_eq!(recorder.count(Hook::Failed), 0);

    tracker.shutdown().await?;
    Ok(())
}

/// Caller post functions take precedence over configured URLs.
#[tokio::test]
async fn post_functions_replace_http_delivery() -> Result<()> {
    let collector = MockCollector::start().await;
    let dir = tempfile::tempdir()?;
    let recorder = HookRecorder::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();

    let posts = beacon::TrackPosts::default().event(post_fn(move |body: Value| {
        let tx = tx.clone();
        async move {
            if body["name"] == "forbidden" {
                return Err(PostError::permanent("blocked by policy"));
            }
            tx.send(body).map_err(|e| PostError::Network(e.to_string()))?;
            Ok(json!({"ok": true}))
        }
    }));
    let tracker = Tracker::builder(collector_config(&collector, dir.path()))
        .posts(posts)
        .subscriber(recorder.clone())
        .build()?;

    tracker.init().await?;
    tracker.track("forbidden", Properties::new());
    tracker.track("allowed", Properties::new());
    recorder.wait_for(Hook::Succeeded, 2).await?;

    let posted = rx.recv().await.expect("allowed event posted");
    assert_eq!(posted["name"], "allowed");
    assert_eq!(recorder.count(Hook::Failed), 1);
    assert!(collector.received(EVENTS_PATH).await?.is_empty());
    assert_eq!(collector.received(VISITS_PATH).await?.len(), 1);

    tracker.shutdown().await?;
    Ok(())
}
