//! Ingress Event Model
//!
//! Shape of publisher-submitted events and the validation applied
//! before anything reaches the ingestion queue. Validation is a pure
//! function from request bytes to a batch of [`Event`]s; rejection
//! fails the whole request and leaves no state behind.

use serde::Deserialize;

use super::error::{FieldError, ValidationError};

/// A validated event as it travels through the ingestion pipeline.
///
/// An event is uniquely identified by `(topic, event_id)`; every other
/// field is carried along untouched. `timestamp` stays the exact string
/// the publisher submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub topic: String,
    pub event_id: String,
    pub timestamp: String,
    pub source: String,
    pub payload: serde_json::Value,
}

/// Publish request body before validation
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub events: Option<Vec<EventInput>>,
}

/// One event as submitted; every field is optional until validated
#[derive(Debug, Deserialize)]
pub struct EventInput {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Parse and validate a publish request body.
///
/// Accepts between 1 and `batch_max` events. Any invalid event fails
/// the whole batch.
pub fn parse_publish_request(body: &[u8], batch_max: usize) -> Result<Vec<Event>, ValidationError> {
    let request: PublishRequest = serde_json::from_slice(body)?;

    let inputs = request.events.ok_or(ValidationError::MissingEvents)?;
    if inputs.is_empty() || inputs.len() > batch_max {
        return Err(ValidationError::BatchSize {
            got: inputs.len(),
            max: batch_max,
        });
    }

    inputs
        .into_iter()
        .enumerate()
        .map(|(index, input)| {
            validate_event(input).map_err(|problem| ValidationError::InvalidEvent { index, problem })
        })
        .collect()
}

/// Validate a single submitted event
pub fn validate_event(input: EventInput) -> Result<Event, FieldError> {
    let topic = require_string("topic", input.topic)?;
    let event_id = require_string("event_id", input.event_id)?;

    let timestamp = require_string("timestamp", input.timestamp)?;
    // Shape check only; the string itself is preserved byte-for-byte.
    if chrono::DateTime::parse_from_rfc3339(&timestamp).is_err() {
        return Err(FieldError::Timestamp(timestamp));
    }

    let source = require_string("source", input.source)?;

    let payload = input.payload.ok_or(FieldError::Missing("payload"))?;
    if !payload.is_object() {
        return Err(FieldError::PayloadNotObject);
    }

    Ok(Event {
        topic,
        event_id,
        timestamp,
        source,
        payload,
    })
}

fn require_string(field: &'static str, value: Option<String>) -> Result<String, FieldError> {
    let value = value.ok_or(FieldError::Missing(field))?;
    if value.trim().is_empty() {
        return Err(FieldError::Empty(field));
    }
    Ok(value)
}
