//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::path::PathBuf;

use crate::store::DurabilityMode;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the dedup store and its journal files
    pub data_dir: PathBuf,

    /// Ingestion queue capacity, in events
    pub queue_capacity: usize,

    /// Maximum events accepted in a single publish request
    pub batch_publish_max: usize,

    /// Store durability mode
    pub durability_mode: DurabilityMode,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Seconds the consumer gets to drain the queue at shutdown
    pub shutdown_grace_seconds: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = env::var("DATA_DIR")
            .unwrap_or_else(|_| "./data".to_string())
            .into();

        let queue_capacity = env::var("QUEUE_CAPACITY")
            .unwrap_or_else(|_| "10000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("QUEUE_CAPACITY"))?;

        let batch_publish_max = env::var("BATCH_PUBLISH_MAX")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("BATCH_PUBLISH_MAX"))?;

        let durability_mode = env::var("DURABILITY_MODE")
            .unwrap_or_else(|_| "checkpoint".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DURABILITY_MODE"))?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let shutdown_grace_seconds = env::var("SHUTDOWN_GRACE_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("SHUTDOWN_GRACE_SECONDS"))?;

        Ok(Self {
            data_dir,
            queue_capacity,
            batch_publish_max,
            durability_mode,
            host,
            port,
            shutdown_grace_seconds,
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
