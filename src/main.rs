//! log_aggregator - Pub/Sub Log Aggregator
//!
//! Single-node aggregator that ingests immutable event records from
//! many concurrent publishers, applies exactly-once processing on top
//! of an at-least-once transport, and serves the accumulated events
//! for query.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use log_aggregator::api::{self, AppState};
use log_aggregator::consumer;
use log_aggregator::queue;
use log_aggregator::stats::Counters;
use log_aggregator::store::DedupStore;
use log_aggregator::Config;

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "log_aggregator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    api::create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing();

    // Load configuration
    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Starting log_aggregator");
    tracing::info!(
        data_dir = %config.data_dir.display(),
        mode = ?config.durability_mode,
        "Opening dedup store..."
    );

    // A store that cannot open is fatal; refuse to serve.
    let store = DedupStore::open(&config.data_dir, config.durability_mode).await?;
    let counters = Counters::load(&store).await?;

    // Spawn the single consumer worker behind the bounded queue.
    let (ingest_queue, receiver) = queue::bounded(config.queue_capacity);
    let mut consumer_task = tokio::spawn(consumer::run(
        receiver,
        store.clone(),
        counters.clone(),
    ));

    let state = AppState {
        store: store.clone(),
        queue: ingest_queue,
        counters,
        started_at: Instant::now(),
        batch_publish_max: config.batch_publish_max,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Every queue sender lives in the router; once the server future
    // resolves they are gone, and the consumer exits after draining
    // what is left.
    tracing::info!("Server shutting down, draining ingestion queue...");
    let grace = Duration::from_secs(config.shutdown_grace_seconds);
    match tokio::time::timeout(grace, &mut consumer_task).await {
        Ok(Ok(())) => tracing::info!("Ingestion queue drained"),
        Ok(Err(e)) => tracing::error!("Consumer worker failed: {}", e),
        Err(_) => {
            tracing::warn!(
                grace_seconds = config.shutdown_grace_seconds,
                "Drain deadline reached, abandoning remaining queue entries"
            );
            consumer_task.abort();
        }
    }

    // Flush checkpointed state before exit.
    store.close().await?;
    tracing::info!("Dedup store closed. Goodbye!");

    Ok(())
}

/// Wait for SIGINT or SIGTERM. Once this resolves the server stops
/// accepting publishes; the queue drain and store close follow in
/// `main`.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.expect("Failed to listen for Ctrl+C");
                tracing::info!("Ctrl+C received, stopping publish intake");
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, stopping publish intake");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Ctrl+C received, stopping publish intake");
    }
}
