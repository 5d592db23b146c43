use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StockflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Upload dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Batch processing scheduler failures.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Batch {batch_id} interrupted by shutdown")]
    Interrupted { batch_id: String },

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

/// Upload dispatch scheduler failures.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Upload dispatcher is already running")]
    AlreadyRunning,

    #[error("No active destination accepts '{classification}' content")]
    NoActiveDestinations { classification: String },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, StockflowError>;
