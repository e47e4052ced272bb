//! Ingestion Queue
//!
//! Bounded in-memory FIFO between the publish handlers and the single
//! consumer worker. Capacity for a whole batch is reserved up front, so
//! once a request is accepted its events can always be submitted; the
//! queue itself never drops an element. The queue is not durable: a
//! restart empties it and publishers are expected to retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::OwnedPermit;

use crate::domain::Event;

/// Sending half, shared by all publish handlers
#[derive(Debug, Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<Event>,
    depth: Arc<AtomicUsize>,
}

/// Receiving half, owned by the consumer worker
#[derive(Debug)]
pub struct IngestReceiver {
    rx: mpsc::Receiver<Event>,
    depth: Arc<AtomicUsize>,
}

/// Create a bounded queue with `capacity` slots
pub fn bounded(capacity: usize) -> (IngestQueue, IngestReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let depth = Arc::new(AtomicUsize::new(0));

    (
        IngestQueue {
            tx,
            depth: depth.clone(),
        },
        IngestReceiver { rx, depth },
    )
}

impl IngestQueue {
    /// Reserve `n` slots, waiting until the queue has room for all of
    /// them. The permits are owned, so the reserved slots can be
    /// carried into a task that outlives the caller. Errors only when
    /// the receiving half is gone.
    pub async fn reserve(&self, n: usize) -> Result<Vec<OwnedPermit<Event>>, SendError<()>> {
        let mut permits = Vec::with_capacity(n);
        for _ in 0..n {
            permits.push(self.tx.clone().reserve_owned().await?);
        }
        Ok(permits)
    }

    /// Submit one event through a previously reserved slot
    pub fn enqueue(&self, permit: OwnedPermit<Event>, event: Event) {
        permit.send(event);
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    /// Events enqueued or in flight, not yet acknowledged by the consumer
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

impl IngestReceiver {
    /// Wait for the next event. Returns `None` once every sender is
    /// dropped and the queue has drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Acknowledge that the last received event is fully handled
    pub fn ack(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn event(event_id: &str) -> Event {
        Event {
            topic: "t".to_string(),
            event_id: event_id.to_string(),
            timestamp: "2025-10-23T10:00:00Z".to_string(),
            source: "s".to_string(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_fifo_order_and_depth() {
        let (queue, mut receiver) = bounded(8);

        let permits = queue.reserve(3).await.unwrap();
        for (permit, id) in permits.into_iter().zip(["a", "b", "c"]) {
            queue.enqueue(permit, event(id));
        }
        assert_eq!(queue.depth(), 3);

        for expected in ["a", "b", "c"] {
            let received = receiver.recv().await.unwrap();
            assert_eq!(received.event_id, expected);
            receiver.ack();
        }
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_depth_counts_in_flight_events() {
        let (queue, mut receiver) = bounded(8);

        let permits = queue.reserve(1).await.unwrap();
        for permit in permits {
            queue.enqueue(permit, event("a"));
        }

        let _in_flight = receiver.recv().await.unwrap();
        // Dequeued but not acknowledged yet.
        assert_eq!(queue.depth(), 1);
        receiver.ack();
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_reserve_waits_when_full() {
        let (queue, mut receiver) = bounded(2);

        let permits = queue.reserve(2).await.unwrap();
        for (permit, id) in permits.into_iter().zip(["a", "b"]) {
            queue.enqueue(permit, event(id));
        }

        // No free slot, so a further reservation must block.
        let blocked = tokio::time::timeout(Duration::from_millis(50), queue.reserve(1)).await;
        assert!(blocked.is_err());

        let drained = receiver.recv().await.unwrap();
        assert_eq!(drained.event_id, "a");
        receiver.ack();

        let permits = tokio::time::timeout(Duration::from_millis(50), queue.reserve(1))
            .await
            .expect("slot should be free after dequeue")
            .unwrap();
        assert_eq!(permits.len(), 1);
    }
}
