//! log_aggregator Library
//!
//! Re-exports modules for integration testing and external use.

pub mod api;
pub mod config;
pub mod consumer;
pub mod domain;
pub mod error;
pub mod queue;
pub mod stats;
pub mod store;

pub use config::Config;
pub use domain::Event;
pub use error::{AppError, AppResult};
pub use store::{DedupStore, DurabilityMode, Seen, StoredEvent};
