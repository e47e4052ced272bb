//! Consumer Loop
//!
//! The single worker that drains the ingestion queue into the dedup
//! store, strictly in enqueue order with one event in flight at a time.
//! The single-writer shape is deliberate: all marker and counter
//! mutations funnel through here, so the store's own atomicity is the
//! only synchronization the pipeline needs.

use chrono::Utc;

use crate::domain::Event;
use crate::queue::IngestReceiver;
use crate::stats::Counters;
use crate::store::{DedupStore, Seen, StoreError, StoredEvent, DUPLICATE_DROPPED, UNIQUE_PROCESSED};

/// Run the consumer until the queue closes and drains.
///
/// Per-event store failures are logged and swallowed; the publisher's
/// at-least-once retry covers redelivery. The loop exits only when
/// every sender is gone and the remaining entries are consumed.
pub async fn run(mut queue: IngestReceiver, store: DedupStore, counters: Counters) {
    tracing::info!("Consumer worker started");

    while let Some(event) = queue.recv().await {
        if let Err(error) = process_event(&store, &counters, &event).await {
            tracing::error!(
                topic = %event.topic,
                event_id = %event.event_id,
                %error,
                "Failed to process event, leaving redelivery to the publisher"
            );
        }
        queue.ack();
    }

    tracing::info!("Ingestion queue closed, consumer worker exiting");
}

/// Handle one dequeued event: first sight stores it, a repeat is dropped.
async fn process_event(
    store: &DedupStore,
    counters: &Counters,
    event: &Event,
) -> Result<(), StoreError> {
    match store.check_and_mark(&event.topic, &event.event_id).await? {
        Seen::New => {
            let stored = StoredEvent {
                topic: event.topic.clone(),
                event_id: event.event_id.clone(),
                timestamp: event.timestamp.clone(),
                source: event.source.clone(),
                payload: event.payload.clone(),
                processed_at: Utc::now(),
            };

            if let Err(error) = store.store_event(&stored).await {
                // A failed payload write must not leave the marker
                // behind: the retry has to be seen as new again.
                if let Err(unmark_error) = store.unmark(&event.topic, &event.event_id).await {
                    tracing::error!(
                        topic = %event.topic,
                        event_id = %event.event_id,
                        %unmark_error,
                        "Failed to roll back marker after store failure"
                    );
                }
                return Err(error);
            }

            // If this increment fails the counter lags the payload
            // table until the next open re-seats it.
            store.increment_counter(UNIQUE_PROCESSED, 1).await?;
            counters.add_unique_processed(1);

            tracing::debug!(
                topic = %event.topic,
                event_id = %event.event_id,
                "Stored new event"
            );
        }
        Seen::Duplicate => {
            store.increment_counter(DUPLICATE_DROPPED, 1).await?;
            counters.add_duplicate_dropped(1);

            tracing::debug!(
                topic = %event.topic,
                event_id = %event.event_id,
                "Dropped duplicate event"
            );
        }
    }

    Ok(())
}
