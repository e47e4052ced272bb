//! Counter Mirror
//!
//! In-memory reflection of the durable counters, initialized from the
//! store at open time. `/stats` and `/health` read from here, which
//! keeps the liveness path off the database entirely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::store::{DedupStore, StoreError, DUPLICATE_DROPPED, RECEIVED, UNIQUE_PROCESSED};

/// Shared, cheaply clonable counter mirror
#[derive(Debug, Clone, Default)]
pub struct Counters {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    received: AtomicU64,
    unique_processed: AtomicU64,
    duplicate_dropped: AtomicU64,
}

impl Counters {
    /// Initialize the mirror from the durable counters
    pub async fn load(store: &DedupStore) -> Result<Self, StoreError> {
        let counters = Self::default();
        counters
            .inner
            .received
            .store(store.load_counter(RECEIVED).await?, Ordering::SeqCst);
        counters
            .inner
            .unique_processed
            .store(store.load_counter(UNIQUE_PROCESSED).await?, Ordering::SeqCst);
        counters
            .inner
            .duplicate_dropped
            .store(store.load_counter(DUPLICATE_DROPPED).await?, Ordering::SeqCst);

        Ok(counters)
    }

    pub fn add_received(&self, n: u64) {
        self.inner.received.fetch_add(n, Ordering::SeqCst);
    }

    pub fn add_unique_processed(&self, n: u64) {
        self.inner.unique_processed.fetch_add(n, Ordering::SeqCst);
    }

    pub fn add_duplicate_dropped(&self, n: u64) {
        self.inner.duplicate_dropped.fetch_add(n, Ordering::SeqCst);
    }

    pub fn received(&self) -> u64 {
        self.inner.received.load(Ordering::SeqCst)
    }

    pub fn unique_processed(&self) -> u64 {
        self.inner.unique_processed.load(Ordering::SeqCst)
    }

    pub fn duplicate_dropped(&self) -> u64 {
        self.inner.duplicate_dropped.load(Ordering::SeqCst)
    }
}
