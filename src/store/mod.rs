//! Dedup Store module
//!
//! Persistence layer for exactly-once processing.
//! Handles processed markers, stored event payloads and counters in SQLite.

mod error;
mod repository;

pub use error::StoreError;
pub use repository::{
    DedupStore, DurabilityMode, Seen, StoredEvent, DUPLICATE_DROPPED, RECEIVED, UNIQUE_PROCESSED,
};
