//! API module
//!
//! HTTP endpoints and shared application state.

pub mod routes;

pub use routes::{create_router, AppState};
