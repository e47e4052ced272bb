//! API Routes
//!
//! HTTP endpoint definitions.

use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::domain;
use crate::error::AppError;
use crate::queue::IngestQueue;
use crate::stats::Counters;
use crate::store::{DedupStore, StoredEvent, RECEIVED};

/// How long a publish request may wait for queue capacity before the
/// request fails with 503
const ENQUEUE_WAIT: Duration = Duration::from_secs(2);

/// Events returned by `GET /events` when no limit is given
const DEFAULT_QUERY_LIMIT: i64 = 100;

/// Shared application state
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: DedupStore,
    pub queue: IngestQueue,
    pub counters: Counters,
    pub started_at: Instant,
    pub batch_publish_max: usize,
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub accepted: usize,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub topic: Option<String>,
    pub total: usize,
    pub events: Vec<StoredEvent>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: f64,
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub topics: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_size: usize,
    pub processed_count: u64,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/publish", post(publish))
        .route("/events", get(get_events))
        .route("/stats", get(get_stats))
        .route("/health", get(get_health))
}

// =========================================================================
// POST /publish
// =========================================================================

/// Validate a batch of events and hand it to the ingestion queue
async fn publish(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<PublishResponse>), AppError> {
    let events = domain::parse_publish_request(&body, state.batch_publish_max)
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
    let accepted = events.len();

    // Reserve queue capacity for the whole batch first; `received` is
    // only advanced once the enqueue can no longer fail.
    let permits = match tokio::time::timeout(ENQUEUE_WAIT, state.queue.reserve(accepted)).await {
        Ok(Ok(permits)) => permits,
        Ok(Err(_)) => return Err(AppError::Internal("Ingestion queue is closed".to_string())),
        Err(_) => return Err(AppError::QueueSaturated),
    };

    // Spawned so that a client disconnect cannot abandon the batch
    // between the counter increment and the enqueue.
    let submit = tokio::spawn(async move {
        state
            .store
            .increment_counter(RECEIVED, accepted as u64)
            .await?;
        state.counters.add_received(accepted as u64);

        for (permit, event) in permits.into_iter().zip(events) {
            state.queue.enqueue(permit, event);
        }

        Ok::<(), AppError>(())
    });

    match submit.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(e) => return Err(AppError::Internal(format!("Publish task failed: {e}"))),
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            accepted,
            message: format!("Accepted {} event(s) for processing", accepted),
        }),
    ))
}

// =========================================================================
// GET /events
// =========================================================================

/// Query stored events, newest publisher timestamp first
async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    let events = state
        .store
        .query_events(query.topic.as_deref(), limit)
        .await?;

    Ok(Json(EventsResponse {
        topic: query.topic,
        total: events.len(),
        events,
    }))
}

// =========================================================================
// GET /stats
// =========================================================================

/// Processing counters and the topics projection
async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let topics = state.store.topics().await?;

    Ok(Json(StatsResponse {
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
        received: state.counters.received(),
        unique_processed: state.counters.unique_processed(),
        duplicate_dropped: state.counters.duplicate_dropped(),
        topics,
    }))
}

// =========================================================================
// GET /health
// =========================================================================

/// Liveness probe. Reads only in-memory state; never touches the store.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        queue_size: state.queue.depth(),
        processed_count: state.counters.unique_processed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_query_defaults() {
        let query: EventsQuery = serde_json::from_str("{}").unwrap();
        assert!(query.topic.is_none());
        assert!(query.limit.is_none());
    }

    #[test]
    fn test_publish_response_shape() {
        let response = PublishResponse {
            accepted: 3,
            message: "Accepted 3 event(s) for processing".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["accepted"], 3);
        assert!(json["message"].is_string());
    }

    #[test]
    fn test_health_response_shape() {
        let response = HealthResponse {
            status: "healthy",
            queue_size: 2,
            processed_count: 7,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["queue_size"], 2);
        assert_eq!(json["processed_count"], 7);
    }
}
