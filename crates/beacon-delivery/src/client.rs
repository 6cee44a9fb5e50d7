//! Transports that hand payloads to the collector.
//!
//! Two transports exist: [`HttpTransport`] POSTs JSON over HTTP with
//! reqwest, and [`PostTransport`] calls a caller-supplied async function
//! with the same input and output shape. Both classify failures into
//! [`DeliveryError`] variants the retry policy understands.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use beacon_core::JobKind;
use futures::future::BoxFuture;
use reqwest::{header::HeaderMap, StatusCode, Url};
use serde_json::Value;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::error::{DeliveryError, Result};

/// Longest response body excerpt kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 1024;

/// Retry-After assumed when the header is present but unparseable.
const DEFAULT_RETRY_AFTER_SECONDS: u64 = 60;

/// One delivery attempt handed to a transport.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Id of the event or visit record being delivered.
    pub payload_id: Uuid,
    /// Lane the payload travels through.
    pub kind: JobKind,
    /// Attempt number (1-based).
    pub attempt_number: u32,
    /// JSON body.
    pub body: Value,
}

/// Delivers a payload to the collector.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Sends one payload and returns the collector's JSON answer.
    ///
    /// # Errors
    ///
    /// Returns a categorized [`DeliveryError`] describing why the collector
    /// did not accept the payload.
    async fn send(&self, request: &DeliveryRequest) -> Result<Value>;
}

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for a single HTTP request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: concat!("beacon/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// HTTP transport POSTing JSON to one collector URL.
///
/// Clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    config: ClientConfig,
}

impl HttpTransport {
    /// Creates a transport for `url`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the URL is not an
    /// absolute http(s) URL or the HTTP client cannot be built.
    pub fn new(url: &str, config: ClientConfig) -> Result<Self> {
        let url = parse_collector_url(url)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, url, config })
    }

    /// Creates a transport sharing an existing client's connection pool.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` for an invalid URL.
    pub fn with_client(client: reqwest::Client, url: &str, config: ClientConfig) -> Result<Self> {
        Ok(Self { client, url: parse_collector_url(url)?, config })
    }

    /// Collector URL this transport posts to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Underlying HTTP client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &DeliveryRequest) -> Result<Value> {
        let start_time = std::time::Instant::now();

        let span = info_span!(
            "beacon_delivery",
            payload_id = %request.payload_id,
            lane = %request.kind,
            url = %self.url,
            attempt = request.attempt_number
        );

        async move {
            tracing::debug!("starting delivery");

            let response = self
                .client
                .post(self.url.clone())
                .json(&request.body)
                .header("X-Beacon-Payload-Id", request.payload_id.to_string())
                .header("X-Beacon-Attempt", request.attempt_number.to_string())
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        duration_ms = start_time.elapsed().as_millis(),
                        error = %e,
                        "request failed"
                    );
                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let status = response.status();
            let retry_after = extract_retry_after_seconds(response.headers());
            let body = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read response body");
                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout));
                    }
                    return Err(DeliveryError::network(format!("failed to read response: {e}")));
                },
            };

            tracing::debug!(
                status = status.as_u16(),
                duration_ms = start_time.elapsed().as_millis(),
                "received response"
            );

            classify_response(status, retry_after, &body)
        }
        .instrument(span)
        .await
    }
}

/// Maps a collector response onto the delivery outcome.
fn classify_response(status: StatusCode, retry_after: Option<u64>, body: &[u8]) -> Result<Value> {
    let status_code = status.as_u16();

    if status.is_success() {
        tracing::info!(status = status_code, "payload delivered");
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        return Ok(serde_json::from_slice(body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned())));
    }

    let excerpt = truncate_body(body);
    match status_code {
        429 => {
            tracing::warn!(status = status_code, retry_after, "collector rate limited us");
            Err(DeliveryError::rate_limited(retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECONDS)))
        },
        400..=499 => {
            tracing::warn!(status = status_code, "client error response");
            Err(DeliveryError::client_error(status_code, excerpt))
        },
        _ => {
            tracing::warn!(status = status_code, "server error response");
            Err(DeliveryError::server_error(status_code, excerpt))
        },
    }
}

/// Lossy UTF-8 excerpt of a response body.
fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_CHARS {
        return text.into_owned();
    }
    let suffix = "... (truncated)";
    let kept: String = text.chars().take(MAX_ERROR_BODY_CHARS - suffix.len()).collect();
    format!("{kept}{suffix}")
}

fn parse_collector_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|e| DeliveryError::configuration(format!("invalid collector URL {url:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DeliveryError::configuration(format!(
            "collector URL {url:?} must use http or https"
        )));
    }
    Ok(parsed)
}

/// Extracts the retry-after delay from response headers.
///
/// Supports both seconds and HTTP-date formats. Returns `None` when the
/// header is absent, and a default of 60 seconds when it cannot be parsed.
pub fn extract_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    let retry_after = headers.get(reqwest::header::RETRY_AFTER)?;
    let Ok(retry_after) = retry_after.to_str() else {
        return Some(DEFAULT_RETRY_AFTER_SECONDS);
    };
    let retry_after = retry_after.trim();

    if let Ok(seconds) = retry_after.parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date_time) = chrono::DateTime::parse_from_rfc2822(retry_after) {
        let now = chrono::Utc::now();
        let retry_time = date_time.with_timezone(&chrono::Utc);
        let seconds = retry_time
            .signed_duration_since(now)
            .to_std()
            .map(|duration| duration.as_secs())
            .unwrap_or(0);
        return Some(seconds);
    }

    Some(DEFAULT_RETRY_AFTER_SECONDS)
}

/// Error a caller-supplied post function reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostError {
    /// The network was unusable; the job requeues without limit.
    Network(String),
    /// The collector refused the payload.
    Rejected {
        /// Why the payload was refused
        message: String,
        /// Whether a later attempt may succeed
        retryable: bool,
    },
}

impl PostError {
    /// Creates a rejection that may succeed on retry.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into(), retryable: true }
    }

    /// Creates a rejection that will never succeed.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into(), retryable: false }
    }
}

impl From<PostError> for DeliveryError {
    fn from(error: PostError) -> Self {
        match error {
            PostError::Network(message) => Self::network(message),
            PostError::Rejected { message, retryable } => Self::rejected(message, retryable),
        }
    }
}

/// Caller-supplied async function standing in for the HTTP POST.
pub type PostFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, PostError>> + Send + Sync>;

/// Wraps an async closure as a [`PostFn`].
///
/// # Example
///
/// ```
/// use beacon_delivery::client::{post_fn, PostError};
/// use serde_json::{json, Value};
///
/// let post = post_fn(|body: Value| async move {
///     if body.is_null() {
///         return Err(PostError::permanent("empty payload"));
///     }
///     Ok(json!({"ok": true}))
/// });
/// # let _ = post;
/// ```
pub fn post_fn<F, Fut>(f: F) -> PostFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, PostError>> + Send + 'static,
{
    Arc::new(move |body| Box::pin(f(body)))
}

/// Transport invoking a caller-supplied post function.
#[derive(Clone)]
pub struct PostTransport {
    post: PostFn,
}

impl PostTransport {
    /// Creates a transport around `post`.
    pub fn new(post: PostFn) -> Self {
        Self { post }
    }
}

impl std::fmt::Debug for PostTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for PostTransport {
    async fn send(&self, request: &DeliveryRequest) -> Result<Value> {
        let span = info_span!(
            "beacon_delivery",
            payload_id = %request.payload_id,
            lane = %request.kind,
            attempt = request.attempt_number
        );

        (self.post)(request.body.clone())
            .instrument(span)
            .await
            .map_err(DeliveryError::from)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn create_test_request() -> DeliveryRequest {
        DeliveryRequest {
            payload_id: Uuid::new_v4(),
            kind: JobKind::Tracking,
            attempt_number: 1,
            body: json!({"name": "click", "properties": {}}),
        }
    }

    fn transport_for(server: &MockServer) -> HttpTransport {
        HttpTransport::new(&format!("{}/events", server.uri()), ClientConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn successful_delivery_returns_collector_json() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/events"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_json(json!({"name": "click", "properties": {}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accepted": true})))
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        let answer = transport.send(&create_test_request()).await.unwrap();

        assert_eq!(answer, json!({"accepted": true}));
    }

    #[tokio::test]
    async fn empty_success_body_is_null() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        assert_eq!(transport.send(&create_test_request()).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn delivery_metadata_headers_added() {
        let mock_server = MockServer::start().await;
        let request = create_test_request();

        Mock::given(matchers::method("POST"))
            .and(matchers::header("X-Beacon-Payload-Id", request.payload_id.to_string().as_str()))
            .and(matchers::header("X-Beacon-Attempt", "1"))
            .and(matchers::header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        transport.send(&request).await.unwrap();
    }

    #[tokio::test]
    async fn client_error_is_classified() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("unknown event"))
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        let error = transport.send(&create_test_request()).await.unwrap_err();

        assert!(matches!(
            &error,
            DeliveryError::ClientError { status_code: 422, body } if body == "unknown event"
        ));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn server_error_is_classified() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        let error = transport.send(&create_test_request()).await.unwrap_err();

        assert!(matches!(error, DeliveryError::ServerError { status_code: 503, .. }));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_honours_retry_after() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "120"))
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        let error = transport.send(&create_test_request()).await.unwrap_err();

        assert!(matches!(error, DeliveryError::RateLimited { retry_after_seconds: 120 }));
    }

    #[tokio::test]
    async fn slow_collector_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let config =
            ClientConfig { timeout: Duration::from_millis(100), ..ClientConfig::default() };
        let transport =
            HttpTransport::new(&format!("{}/events", mock_server.uri()), config).unwrap();
        let error = transport.send(&create_test_request()).await.unwrap_err();

        assert!(matches!(error, DeliveryError::Timeout { timeout_ms: 100 }));
    }

    #[tokio::test]
    async fn unreachable_collector_is_network_error() {
        let transport =
            HttpTransport::new("http://127.0.0.1:1/events", ClientConfig::default()).unwrap();
        let error = transport.send(&create_test_request()).await.unwrap_err();

        assert!(error.is_connectivity());
    }

    #[test]
    fn invalid_urls_are_configuration_errors() {
        for url in ["not a url", "ftp://collector.example.com", "/relative/path"] {
            let error = HttpTransport::new(url, ClientConfig::default()).unwrap_err();
            assert!(matches!(error, DeliveryError::ConfigurationError { .. }), "{url}");
        }
    }

    #[test]
    fn retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_retry_after_seconds(&headers), None);

        headers.insert(reqwest::header::RETRY_AFTER, "120".parse().unwrap());
        assert_eq!(extract_retry_after_seconds(&headers), Some(120));

        headers.insert(reqwest::header::RETRY_AFTER, "invalid".parse().unwrap());
        assert_eq!(extract_retry_after_seconds(&headers), Some(60));

        headers.insert(
            reqwest::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(extract_retry_after_seconds(&headers), Some(0));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(5_000);
        let excerpt = truncate_body(body.as_bytes());

        assert_eq!(excerpt.chars().count(), MAX_ERROR_BODY_CHARS);
        assert!(excerpt.ends_with("... (truncated)"));
        assert_eq!(truncate_body(b"short"), "short");
    }

    #[tokio::test]
    async fn post_transport_maps_post_errors() {
        let transport = PostTransport::new(post_fn(|body: Value| async move {
            match body["name"].as_str() {
                Some("offline") => Err(PostError::Network("no route".to_string())),
                Some("bad") => Err(PostError::permanent("schema mismatch")),
                _ => Ok(json!({"echo": body})),
            }
        }));

        let mut request = create_test_request();
        assert_eq!(
            transport.send(&request).await.unwrap(),
            json!({"echo": {"name": "click", "properties": {}}})
        );

        request.body = json!({"name": "offline"});
        assert!(transport.send(&request).await.unwrap_err().is_connectivity());

        request.body = json!({"name": "bad"});
        let error = transport.send(&request).await.unwrap_err();
        assert!(matches!(error, DeliveryError::Rejected { retryable: false, .. }));
    }
}
