//! Common test utilities

use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tower::util::ServiceExt;

use log_aggregator::api::{self, AppState};
use log_aggregator::consumer;
use log_aggregator::queue;
use log_aggregator::stats::Counters;
use log_aggregator::store::{DedupStore, DurabilityMode};

/// A fully wired pipeline over a throwaway data directory
pub struct TestApp {
    pub router: Router,
    pub store: DedupStore,
    pub counters: Counters,
    pub consumer: JoinHandle<()>,
    // Keeps the data directory alive for the duration of the test
    _data_dir: TempDir,
}

/// Spin up store, counter mirror, queue, consumer worker and router
pub async fn spawn_app() -> TestApp {
    spawn_app_with(10_000, true).await
}

/// Variant with a custom queue capacity; when `run_consumer` is false
/// the queue is never drained, so saturation can be exercised.
pub async fn spawn_app_with(queue_capacity: usize, run_consumer: bool) -> TestApp {
    let data_dir = tempfile::tempdir().expect("Failed to create temp data dir");
    let store = DedupStore::open(data_dir.path(), DurabilityMode::Checkpoint)
        .await
        .expect("Failed to open dedup store");
    let counters = Counters::load(&store).await.expect("Failed to load counters");

    let (ingest_queue, receiver) = queue::bounded(queue_capacity);
    let consumer = if run_consumer {
        tokio::spawn(consumer::run(receiver, store.clone(), counters.clone()))
    } else {
        tokio::spawn(async move {
            let _receiver = receiver;
            std::future::pending::<()>().await
        })
    };

    let state = AppState {
        store: store.clone(),
        queue: ingest_queue,
        counters: counters.clone(),
        started_at: Instant::now(),
        batch_publish_max: 1000,
    };

    TestApp {
        router: api::create_router().with_state(state),
        store,
        counters,
        consumer,
        _data_dir: data_dir,
    }
}

/// Wait until every received event is settled as unique or duplicate
pub async fn wait_for_drain(app: &TestApp) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let received = app.counters.received();
        let settled = app.counters.unique_processed() + app.counters.duplicate_dropped();
        if received == settled {
            return;
        }
        if Instant::now() > deadline {
            panic!(
                "Queue did not drain: received={} settled={}",
                received, settled
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// POST a JSON body to /publish and return status plus response body
pub async fn publish(router: &Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/publish")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    send(router, request).await
}

/// GET a path and return status plus response body
pub async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("Response body was not JSON")
    };

    (status, json)
}

/// A publish body carrying a single event
pub fn single_event_body(topic: &str, event_id: &str, timestamp: &str) -> serde_json::Value {
    serde_json::json!({ "events": [event(topic, event_id, timestamp)] })
}

/// One well-formed event object
pub fn event(topic: &str, event_id: &str, timestamp: &str) -> serde_json::Value {
    serde_json::json!({
        "topic": topic,
        "event_id": event_id,
        "timestamp": timestamp,
        "source": "test-publisher",
        "payload": {"x": 1}
    })
}
