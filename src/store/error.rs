//! Dedup Store Errors
//!
//! Error types for dedup store operations.

/// Errors that can occur in the dedup store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data directory could not be created or accessed
    #[error("Data directory error: {0}")]
    Io(#[from] std::io::Error),
}
