//! Error types for delivery operations.
//!
//! Defines every error condition the delivery queue can meet: connectivity
//! loss, transport failures, configuration gaps, duplicate ids and
//! persistence faults. Each error maps onto the [`ErrorCategory`] taxonomy
//! reported to lifecycle hooks and carries the retry classification the
//! queue acts on.

use std::time::Duration;

use beacon_core::{ErrorCategory, ErrorReport, JobKind};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Comprehensive error types for delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Connectivity was lost while an attempt was in flight.
    #[error("device went offline during delivery")]
    Offline,

    /// Delivery attempt exceeded its time ceiling.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Attempt ceiling in milliseconds
        timeout_ms: u64,
    },

    /// Collector answered with a client error (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Collector answered with a server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Collector asked us to slow down.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds the collector asked us to wait
        retry_after_seconds: u64,
    },

    /// A caller-supplied post function rejected the payload.
    #[error("post function rejected payload: {message}")]
    Rejected {
        /// Rejection reason reported by the post function
        message: String,
        /// Whether the post function expects a retry to succeed
        retryable: bool,
    },

    /// Neither a post function nor a URL is configured for a lane.
    #[error("no {kind} sink configured: set a track URL or post function")]
    MissingSink {
        /// Lane without a sink
        kind: JobKind,
    },

    /// Invalid delivery configuration.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// The same payload id was produced twice.
    #[error("duplicate payload id {id}")]
    DuplicateId {
        /// Duplicated payload id
        id: Uuid,
    },

    /// Reading or writing the queue snapshot failed.
    #[error("persistence error: {message}")]
    PersistenceError {
        /// Persistence error message
        message: String,
    },

    /// A payload could not be serialized.
    #[error("serialization error: {message}")]
    SerializationError {
        /// Serialization error message
        message: String,
    },

    /// Lane workers did not stop in time.
    #[error("lane workers did not stop within {timeout:?}")]
    ShutdownTimeout {
        /// Shutdown timeout that elapsed
        timeout: Duration,
    },

    /// A lane worker panicked.
    #[error("{lane} lane worker panicked: {error}")]
    WorkerPanic {
        /// Lane whose worker panicked
        lane: JobKind,
        /// Panic description
        error: String,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a rate limit error.
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a post function rejection.
    pub fn rejected(message: impl Into<String>, retryable: bool) -> Self {
        Self::Rejected { message: message.into(), retryable }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::PersistenceError { message: message.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Whether a later attempt may succeed.
    ///
    /// Returns `true` for connectivity errors, timeouts, server errors (5xx),
    /// rate limits, retryable post-function rejections and persistence
    /// faults. Returns `false` for client errors (4xx), non-retryable
    /// rejections and anything caused by how the queue is wired.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Offline
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. }
            | Self::PersistenceError { .. } => true,

            Self::Rejected { retryable, .. } => *retryable,

            Self::ClientError { .. }
            | Self::MissingSink { .. }
            | Self::ConfigurationError { .. }
            | Self::DuplicateId { .. }
            | Self::SerializationError { .. }
            | Self::ShutdownTimeout { .. }
            | Self::WorkerPanic { .. }
            | Self::InternalError { .. } => false,
        }
    }

    /// Whether the error means the network was unusable.
    ///
    /// Connectivity errors requeue without ever counting toward the attempt
    /// ceiling's terminal failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::NetworkError { .. } | Self::Offline)
    }

    /// Builds the report handed to lifecycle hooks.
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(ErrorCategory::from(self), self.to_string(), self.is_retryable())
    }
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Offline => Self::Connectivity,
            DeliveryError::Timeout { .. }
            | DeliveryError::ClientError { .. }
            | DeliveryError::ServerError { .. }
            | DeliveryError::RateLimited { .. }
            | DeliveryError::Rejected { .. } => Self::Transport,
            DeliveryError::MissingSink { .. } | DeliveryError::ConfigurationError { .. } => {
                Self::Configuration
            },
            DeliveryError::DuplicateId { .. } => Self::Duplicate,
            DeliveryError::PersistenceError { .. } => Self::Persistence,
            DeliveryError::SerializationError { .. }
            | DeliveryError::ShutdownTimeout { .. }
            | DeliveryError::WorkerPanic { .. }
            | DeliveryError::InternalError { .. } => Self::Internal,
        }
    }
}

impl From<beacon_core::CoreError> for DeliveryError {
    fn from(error: beacon_core::CoreError) -> Self {
        Self::serialization(error.to_string())
    }
}
