//! Error types for the graph state.

use crate::types::LinkKey;
use thiserror::Error;

/// Main error type for graph operations.
///
/// Missing entities, malformed keys, and dangling references are not errors:
/// they surface as `None` from the operation that met them.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Notification cascade from {key} exceeded depth {limit}")]
    NotifyDepthExceeded { key: LinkKey, limit: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        GraphError::Serialization(e.to_string())
    }
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
