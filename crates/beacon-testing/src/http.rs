//! HTTP collector mock for testing deliveries over the wire.
//!
//! Wraps a wiremock server exposing one path per lane. Responses default to
//! `200 {"ok": true}`; failure sequences are mounted with a higher priority
//! and a bounded number of uses, after which the default answers.

use anyhow::{Context, Result};
use beacon_delivery::TrackUrls;
use serde_json::{json, Value};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

/// Path receiving tracking events.
pub const EVENTS_PATH: &str = "/events";

/// Path receiving visit records.
pub const VISITS_PATH: &str = "/visits";

/// Collector accepting events and visits over HTTP.
pub struct MockCollector {
    server: MockServer,
}

impl MockCollector {
    /// Starts a collector that accepts everything.
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        for path in [EVENTS_PATH, VISITS_PATH] {
            Mock::given(matchers::method("POST"))
                .and(matchers::path(path))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
                .with_priority(u8::MAX)
                .mount(&server)
                .await;
        }
        Self { server }
    }

    /// Base URL of the server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// URL receiving tracking events.
    pub fn event_url(&self) -> String {
        format!("{}{EVENTS_PATH}", self.server.uri())
    }

    /// URL receiving visit records.
    pub fn visit_url(&self) -> String {
        format!("{}{VISITS_PATH}", self.server.uri())
    }

    /// Collector URLs for both lanes.
    pub fn track_urls(&self) -> TrackUrls {
        TrackUrls { event: Some(self.event_url()), visit: Some(self.visit_url()) }
    }

    /// Answers the next `times` posts to `path` with `status`.
    pub async fn fail_next(&self, path: &str, times: u64, status: u16) {
        self.respond_next(path, times, ResponseTemplate::new(status).set_body_string("failure"))
            .await;
    }

    /// Answers the next `times` posts to `path` with 429 and a Retry-After.
    pub async fn rate_limit_next(&self, path: &str, times: u64, retry_after_seconds: u64) {
        let template = ResponseTemplate::new(429)
            .insert_header("Retry-After", retry_after_seconds.to_string().as_str());
        self.respond_next(path, times, template).await;
    }

    /// Answers the next `times` posts to `path` with `template`.
    pub async fn respond_next(&self, path: &str, times: u64, template: ResponseTemplate) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(path))
            .respond_with(template)
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// JSON bodies received on `path`, in arrival order.
    ///
    /// # Errors
    ///
    /// Fails if request recording is disabled or a body is not JSON.
    pub async fn received(&self, path: &str) -> Result<Vec<Value>> {
        let requests =
            self.server.received_requests().await.context("request recording is disabled")?;
        requests
            .iter()
            .filter(|request| request.url.path() == path)
            .map(|request| {
                serde_json::from_slice(&request.body).context("collector received a non-JSON body")
            })
            .collect()
    }

    /// Names of the events received, in arrival order.
    ///
    /// # Errors
    ///
    /// See [`received`](Self::received).
    pub async fn received_event_names(&self) -> Result<Vec<String>> {
        Ok(self
            .received(EVENTS_PATH)
            .await?
            .iter()
            .filter_map(|body| body.get("name").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    /// Underlying wiremock server.
    pub fn server(&self) -> &MockServer {
        &self.server
    }
}
