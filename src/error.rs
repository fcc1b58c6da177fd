//! Error types for the memory engine

use thiserror::Error;

/// Result type alias for memory engine operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors that can occur in the memory engine
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Input failed validation (bad dimension, out-of-range score, malformed namespace)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A fragment, namespace, or universe id had no matching entry
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation could not proceed without caller disambiguation
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage backend is unreachable or reported itself unavailable
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An operation exceeded its deadline before completing
    #[error("timeout: {0}")]
    Timeout(String),

    /// A configured limit (namespace count, fragment count) would be exceeded
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Vector dimension mismatch between operands
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension supplied
        actual: usize,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (export/import against a file-backed store)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// True for errors considered transient and worth a single retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}
