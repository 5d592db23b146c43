//! Live progress bookkeeping for batches currently being processed.
//!
//! These snapshots exist only in memory; persisted state lives in the
//! repositories. A batch appears here from the moment it is dispatched
//! until its coordinator exits, on every exit path.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::batch_repo::BatchStats;
use crate::model::{Batch, BatchStatus, Photo};

/// In-memory processing state of one photo within an active batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoWorkState {
    Waiting,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoProgress {
    pub id: String,
    pub file_name: String,
    pub state: PhotoWorkState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhotoProgress {
    pub fn waiting(photo: &Photo) -> Self {
        Self {
            id: photo.id.clone(),
            file_name: photo.file_name.clone(),
            state: PhotoWorkState::Waiting,
            progress: 0,
            error: None,
        }
    }
}

/// Live state of one dispatched batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub batch_id: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_photo: Option<String>,
    pub started_at: DateTime<Utc>,
    pub photos: HashMap<String, PhotoProgress>,
}

impl ProcessingJob {
    pub fn new(batch_id: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            progress: 0,
            current_photo: None,
            started_at: Utc::now(),
            photos: HashMap::new(),
        }
    }
}

/// One row of the queue status surface: persisted batch state overlaid
/// with live progress when the batch is active.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub batch_id: String,
    pub description: String,
    pub status: BatchStatus,
    pub stats: BatchStats,
    /// Overall percentage; live for active batches, derived from
    /// persisted counters otherwise.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_photo: Option<String>,
}

impl QueueEntry {
    pub fn from_persisted(batch: &Batch, stats: BatchStats) -> Self {
        let done = stats.processed + stats.approved + stats.rejected + stats.failed;
        let progress = if stats.total == 0 {
            0
        } else {
            ((done * 100) / stats.total).min(100) as u8
        };
        Self {
            batch_id: batch.id.clone(),
            description: batch.description.clone(),
            status: batch.status,
            stats,
            progress,
            current_photo: None,
        }
    }

    pub fn overlay(&mut self, job: &ProcessingJob) {
        self.progress = job.progress;
        self.current_photo = job.current_photo.clone();
    }
}
