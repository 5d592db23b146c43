//! Application configuration.
//!
//! Loaded from a JSON file (or built in code) and passed explicitly to
//! the schedulers — there is no process-wide singleton. The two
//! concurrency ceilings are deliberately distinct values: the number of
//! batches dispatched concurrently is not the number of photo workers
//! inside one batch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Database file location. `None` means the platform default under
    /// the user's home directory.
    pub database_path: Option<PathBuf>,
    /// Ceiling on concurrently dispatched batches.
    pub max_concurrent_batches: usize,
    /// Worker pool size for photos within one batch.
    pub photo_workers: usize,
    /// Worker pool size for upload jobs. Kept small: uploads are
    /// usually rate-limited by the remote destination.
    pub upload_workers: usize,
    /// Dispatch loop polling interval.
    pub poll_interval_ms: u64,
    /// Backoff schedule for transient collaborator and store failures.
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_concurrent_batches: 1,
            photo_workers: default_photo_workers(),
            upload_workers: 2,
            poll_interval_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

fn default_photo_workers() -> usize {
    num_cpus::get().clamp(1, 8)
}

impl AppConfig {
    /// Reads and validates a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_batches == 0 {
            return Err(ConfigError::Validation {
                message: "maxConcurrentBatches must be at least 1".to_string(),
            });
        }
        if self.photo_workers == 0 {
            return Err(ConfigError::Validation {
                message: "photoWorkers must be at least 1".to_string(),
            });
        }
        if self.upload_workers == 0 {
            return Err(ConfigError::Validation {
                message: "uploadWorkers must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "retry.maxAttempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
