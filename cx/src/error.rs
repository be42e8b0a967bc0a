//! Coordination error types

use std::time::Duration;
use thiserror::Error;

use crate::registry::StoreError;

/// Errors that can occur while coordinating a cluster
///
/// Every variant is fatal to the calling runner. Transient poll misses never
/// surface as errors; they are retried until the attempt bound is hit.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("{operation} timed out after {attempts} attempts ({waited:?})")]
    Timeout {
        operation: &'static str,
        attempts: u32,
        waited: Duration,
    },

    #[error("Cannot register more agents than defined in min-agents-count")]
    CapacityExceeded,

    #[error("Data with the key '{key}' has not been found in the cluster context after {waited:?}")]
    NotFound { key: String, waited: Duration },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown scenario name: {0}")]
    UnknownScenario(String),

    #[error("{operation} returned unexpected status {status}")]
    UnexpectedStatus { operation: &'static str, status: u16 },

    #[error("Invalid payload for key '{key}': {source}")]
    InvalidPayload {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid coordinator URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoordError {
    /// Whether a polling loop should treat this as a miss and try again
    ///
    /// Any unexpected status counts: a proxy in front of the coordinator may
    /// answer 404 or 502 until the coordinator itself is up.
    pub fn is_transient(&self) -> bool {
        match self {
            CoordError::Http(_) | CoordError::UnexpectedStatus { .. } => true,
            CoordError::Timeout { .. }
            | CoordError::CapacityExceeded
            | CoordError::NotFound { .. }
            | CoordError::ValidationError(_)
            | CoordError::UnknownScenario(_)
            | CoordError::InvalidPayload { .. }
            | CoordError::InvalidUrl(_)
            | CoordError::Store(_)
            | CoordError::Io(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CoordError::Timeout { .. })
    }
}
