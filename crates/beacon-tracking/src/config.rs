//! Configuration for the tracking facade.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use beacon_core::Properties;
use beacon_delivery::{
    client::ClientConfig, IntervalPolicy, QueueConfig, RetryPolicy, TrackUrls,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};

/// Configuration file read by [`TrackingConfig::load`].
pub const CONFIG_FILE: &str = "beacon.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "BEACON_";

/// Serializable tracking configuration.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `BEACON_` (highest priority); nested
///    keys are separated by `__`, as in `BEACON_TRACK_URLS__EVENT`
/// 2. Configuration file (`beacon.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Callbacks, post functions and the platform integrations cannot be
/// serialized; they are supplied through the tracker builder.
///
/// # Example
///
/// ```no_run
/// use beacon_tracking::TrackingConfig;
///
/// let config = TrackingConfig::load().expect("configuration should load");
/// println!("delivering events to {:?}", config.track_urls.event);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Stable identifier of this device or installation. Generated when
    /// absent.
    pub visitor_id: Option<String>,

    /// Identifier of the signed-in user, if any.
    pub user_id: Option<String>,

    /// Extra fields merged into every visit record.
    pub visit_params: Properties,

    /// Collector URLs per lane.
    pub track_urls: TrackUrls,

    /// Forces connectivity off, for testing integrations.
    pub offline_mode: bool,

    /// Whether a visit is started automatically on init.
    pub is_track_visit: bool,

    /// Key of the persisted queue snapshot.
    pub snapshot_key: String,

    /// Directory of the default file store.
    pub store_dir: PathBuf,

    // Dispatch
    /// Interval between cycles while connected with work pending.
    pub active_interval_ms: u64,
    /// Interval between cycles otherwise.
    pub idle_interval_ms: u64,
    /// Ceiling on a single delivery attempt.
    pub delivery_timeout_ms: u64,
    /// Attempts before a retryable transport error gives up.
    pub max_attempts: u32,
    /// Wait for a visit after connectivity returns.
    pub visit_grace_ms: u64,
    /// Confirmed ids remembered for duplicate detection.
    pub confirmed_capacity: usize,
    /// Wait for lane workers on shutdown.
    pub shutdown_timeout_ms: u64,

    /// User agent of HTTP deliveries.
    pub user_agent: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        let queue = QueueConfig::default();
        Self {
            visitor_id: None,
            user_id: None,
            visit_params: Properties::new(),
            track_urls: TrackUrls::default(),
            offline_mode: false,
            is_track_visit: true,
            snapshot_key: queue.snapshot_key,
            store_dir: PathBuf::from(".beacon"),
            active_interval_ms: millis(queue.intervals.active),
            idle_interval_ms: millis(queue.intervals.idle),
            delivery_timeout_ms: millis(queue.delivery_timeout),
            max_attempts: queue.retry_policy.max_attempts,
            visit_grace_ms: millis(queue.visit_grace),
            confirmed_capacity: queue.confirmed_capacity,
            shutdown_timeout_ms: millis(queue.shutdown_timeout),
            user_agent: ClientConfig::default().user_agent,
        }
    }
}

impl TrackingConfig {
    /// Loads configuration from defaults, `beacon.toml` and `BEACON_`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::ConfigLoad` if a source cannot be parsed, or
    /// `TrackingError::ConfigurationError` if a value fails validation.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Like [`load`](Self::load), reading the file at `path` instead.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Layered configuration sources, lowest priority first.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::ConfigurationError` naming the first invalid
    /// value.
    pub fn validate(&self) -> Result<()> {
        if self.active_interval_ms == 0 || self.idle_interval_ms == 0 {
            return Err(TrackingError::configuration("dispatch intervals must be positive"));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(TrackingError::configuration("delivery_timeout_ms must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(TrackingError::configuration("max_attempts must be greater than 0"));
        }
        if self.confirmed_capacity == 0 {
            return Err(TrackingError::configuration("confirmed_capacity must be greater than 0"));
        }
        if self.snapshot_key.trim().is_empty() {
            return Err(TrackingError::configuration("snapshot_key must not be empty"));
        }
        if self.visitor_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(TrackingError::configuration("visitor_id must not be blank"));
        }
        Ok(())
    }

    /// Dispatch intervals of the lane workers.
    pub fn intervals(&self) -> IntervalPolicy {
        IntervalPolicy::new(
            Duration::from_millis(self.active_interval_ms),
            Duration::from_millis(self.idle_interval_ms),
        )
    }

    /// Converts to the delivery queue's configuration.
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            snapshot_key: self.snapshot_key.clone(),
            retry_policy: RetryPolicy::with_max_attempts(self.max_attempts),
            intervals: self.intervals(),
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
            visit_grace: Duration::from_millis(self.visit_grace_ms),
            confirmed_capacity: self.confirmed_capacity,
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            offline_mode: self.offline_mode,
        }
    }

    /// Converts to HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(self.delivery_timeout_ms),
            user_agent: self.user_agent.clone(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
