//! Error types for model construction and snapshot decoding.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for model and codec operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Serializing or deserializing a model failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted snapshot carries a format version this build cannot read.
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedSnapshotVersion {
        /// Version found in the snapshot
        found: u32,
        /// Version this build writes
        expected: u32,
    },

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
