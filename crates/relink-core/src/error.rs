//! Error types for relink

use thiserror::Error;

/// Core error type for relink operations
#[derive(Error, Debug)]
pub enum RelinkError {
    /// The manager reached its terminal state. Once broken it never
    /// recovers; the instance must be discarded and recreated.
    #[error("connection manager is broken")]
    Broken,

    /// A queued query was abandoned because the connection could not be
    /// restored before the manager broke.
    #[error("connection has been lost, restore failed")]
    ConnectionLost,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl RelinkError {
    /// Whether this error is one of the manager's own refusals rather
    /// than a failure surfaced from the underlying primitive.
    pub fn is_refusal(&self) -> bool {
        matches!(self, RelinkError::Broken | RelinkError::ConnectionLost)
    }
}

/// Result type alias for relink operations
pub type Result<T> = std::result::Result<T, RelinkError>;
