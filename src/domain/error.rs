//! Domain Error Types
//!
//! Pure validation errors that don't depend on infrastructure.

use thiserror::Error;

/// Why a publish request was rejected.
///
/// These errors represent ingress contract violations. They are
/// independent of the web/infrastructure layer.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Body was not parseable JSON of the expected shape
    #[error("Request body is not a valid publish request: {0}")]
    MalformedBody(#[from] serde_json::Error),

    /// The `events` field was absent
    #[error("Field 'events' is required")]
    MissingEvents,

    /// Batch size outside the accepted range
    #[error("A publish request must carry between 1 and {max} events, got {got}")]
    BatchSize { got: usize, max: usize },

    /// One event in the batch failed a field constraint
    #[error("events[{index}]: {problem}")]
    InvalidEvent { index: usize, problem: FieldError },
}

/// A single-field constraint violation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// Required field was absent or null
    #[error("Field '{0}' is required")]
    Missing(&'static str),

    /// String field was empty after trimming
    #[error("Field '{0}' must be a non-empty string")]
    Empty(&'static str),

    /// Timestamp did not pass the ISO-8601 shape check
    #[error("Field 'timestamp' is not an ISO-8601 timestamp: '{0}'")]
    Timestamp(String),

    /// Payload must be a JSON object, not a scalar, array or null
    #[error("Field 'payload' must be a JSON object")]
    PayloadNotObject,
}
