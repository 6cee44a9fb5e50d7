//! Error types for the tracking facade.

use beacon_delivery::DeliveryError;
use thiserror::Error;

/// Result type alias for tracking operations.
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Errors surfaced synchronously by the tracking facade.
///
/// Delivery outcomes never appear here; they are reported through the
/// lifecycle hooks.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// A configuration value is unusable.
    #[error("configuration error: {message}")]
    ConfigurationError {
        /// What is wrong with the configuration
        message: String,
    },

    /// Configuration sources could not be read or extracted.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// The delivery queue refused an operation.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl TrackingError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Whether this error means the integration is misconfigured.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::ConfigurationError { .. } | Self::ConfigLoad(_) => true,
            Self::Delivery(error) => matches!(
                error,
                DeliveryError::ConfigurationError { .. } | DeliveryError::MissingSink { .. }
            ),
        }
    }
}

impl From<figment::Error> for TrackingError {
    fn from(error: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(error))
    }
}
