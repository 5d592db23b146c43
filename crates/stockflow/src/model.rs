//! Domain types shared by both schedulers.
//!
//! Status enums are stored as strings in the database; `as_str`/`parse`
//! pairs define the canonical wire form. Transition rules live here so
//! the schedulers and repos agree on what moves are legal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A status string (or classification) that is not recognized.
#[derive(Error, Debug)]
#[error("unknown {what}: '{value}'")]
pub struct UnknownValue {
    pub what: &'static str,
    pub value: String,
}

fn unknown(what: &'static str, value: &str) -> UnknownValue {
    UnknownValue {
        what,
        value: value.to_string(),
    }
}

/// Content classification of a batch and its photos. Mutually exclusive;
/// governs which upload destinations are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Editorial,
    Commercial,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Editorial => "editorial",
            Classification::Commercial => "commercial",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownValue> {
        match s {
            "editorial" => Ok(Classification::Editorial),
            "commercial" => Ok(Classification::Commercial),
            other => Err(unknown("classification", other)),
        }
    }
}

/// Lifecycle of a batch. Moves forward only; the single sanctioned
/// regression is an explicit requeue of an interrupted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Queued,
    Processing,
    Processed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Processed => "processed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownValue> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "queued" => Ok(BatchStatus::Queued),
            "processing" => Ok(BatchStatus::Processing),
            "processed" => Ok(BatchStatus::Processed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(unknown("batch status", other)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Processed | BatchStatus::Failed)
    }

    /// Ordering used to enforce monotonic automatic transitions.
    pub fn rank(&self) -> u8 {
        match self {
            BatchStatus::Pending => 0,
            BatchStatus::Queued => 1,
            BatchStatus::Processing => 2,
            BatchStatus::Processed | BatchStatus::Failed => 3,
        }
    }
}

/// Lifecycle of a photo across both pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    Approved,
    Rejected,
    Queued,
    Uploading,
    Uploaded,
    UploadFailed,
    PartiallyUploaded,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Pending => "pending",
            PhotoStatus::Processing => "processing",
            PhotoStatus::Processed => "processed",
            PhotoStatus::Failed => "failed",
            PhotoStatus::Approved => "approved",
            PhotoStatus::Rejected => "rejected",
            PhotoStatus::Queued => "queued",
            PhotoStatus::Uploading => "uploading",
            PhotoStatus::Uploaded => "uploaded",
            PhotoStatus::UploadFailed => "upload_failed",
            PhotoStatus::PartiallyUploaded => "partially_uploaded",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownValue> {
        match s {
            "pending" => Ok(PhotoStatus::Pending),
            "processing" => Ok(PhotoStatus::Processing),
            "processed" => Ok(PhotoStatus::Processed),
            "failed" => Ok(PhotoStatus::Failed),
            "approved" => Ok(PhotoStatus::Approved),
            "rejected" => Ok(PhotoStatus::Rejected),
            "queued" => Ok(PhotoStatus::Queued),
            "uploading" => Ok(PhotoStatus::Uploading),
            "uploaded" => Ok(PhotoStatus::Uploaded),
            "upload_failed" => Ok(PhotoStatus::UploadFailed),
            "partially_uploaded" => Ok(PhotoStatus::PartiallyUploaded),
            other => Err(unknown("photo status", other)),
        }
    }

    /// True for states in which the photo is allowed to carry an
    /// annotation result.
    pub fn may_carry_annotation(&self) -> bool {
        !matches!(
            self,
            PhotoStatus::Pending | PhotoStatus::Processing | PhotoStatus::Failed
        )
    }

    /// True for states from which the review operations may move the
    /// photo to `approved`.
    pub fn approvable(&self) -> bool {
        matches!(self, PhotoStatus::Processed | PhotoStatus::Rejected)
    }
}

/// Per-destination delivery status within a photo's upload-status map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationStatus {
    Pending,
    Queued,
    Uploading,
    Uploaded,
    Failed,
}

impl DestinationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationStatus::Pending => "pending",
            DestinationStatus::Queued => "queued",
            DestinationStatus::Uploading => "uploading",
            DestinationStatus::Uploaded => "uploaded",
            DestinationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownValue> {
        match s {
            "pending" => Ok(DestinationStatus::Pending),
            "queued" => Ok(DestinationStatus::Queued),
            "uploading" => Ok(DestinationStatus::Uploading),
            "uploaded" => Ok(DestinationStatus::Uploaded),
            "failed" => Ok(DestinationStatus::Failed),
            other => Err(unknown("destination status", other)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DestinationStatus::Uploaded | DestinationStatus::Failed)
    }
}

/// A caller-submitted group of photos sharing one classification and
/// source folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub classification: Classification,
    pub description: String,
    pub folder_path: PathBuf,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    pub fn new<P: AsRef<Path>>(
        classification: Classification,
        description: &str,
        folder_path: P,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            classification,
            description: description.to_string(),
            folder_path: folder_path.as_ref().to_path_buf(),
            status: BatchStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One image moving through annotation and upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub batch_id: String,
    pub classification: Classification,
    pub original_path: PathBuf,
    /// Derived preview path; populated by the preparer.
    pub preview_path: Option<PathBuf>,
    pub file_name: String,
    pub file_size: u64,
    /// Contextual metadata extracted during preparation (open-ended).
    #[serde(default)]
    pub context: HashMap<String, String>,
    pub annotation: Option<AnnotationResult>,
    /// destination id -> delivery status.
    #[serde(default)]
    pub upload_status: HashMap<String, DestinationStatus>,
    pub status: PhotoStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Photo {
    /// Creates a pending photo belonging to `batch`. Classification is
    /// inherited from the batch at creation time.
    pub fn new<P: AsRef<Path>>(batch: &Batch, original_path: P, file_size: u64) -> Self {
        let original_path = original_path.as_ref().to_path_buf();
        let file_name = original_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch.id.clone(),
            classification: batch.classification,
            original_path,
            preview_path: None,
            file_name,
            file_size,
            context: HashMap::new(),
            annotation: None,
            upload_status: HashMap::new(),
            status: PhotoStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stock-photo metadata produced by the annotation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationResult {
    /// Classification as judged by the annotation service. May disagree
    /// with the batch; reviewers see both.
    pub classification: Classification,
    pub title: String,
    pub keywords: Vec<String>,
    /// Quality score, 1-10.
    pub quality: u8,
    pub description: String,
    pub category: String,
}

/// Protocol family of an upload destination. The registry maps each
/// kind to an `Uploader` implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Ftp,
    Sftp,
    Api,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationKind::Ftp => "ftp",
            DestinationKind::Sftp => "sftp",
            DestinationKind::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownValue> {
        match s {
            "ftp" => Ok(DestinationKind::Ftp),
            "sftp" => Ok(DestinationKind::Sftp),
            "api" => Ok(DestinationKind::Api),
            other => Err(unknown("destination kind", other)),
        }
    }
}

/// An external upload target with its own protocol and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub name: String,
    pub kind: DestinationKind,
    /// Classifications this destination accepts.
    pub supported: Vec<Classification>,
    /// Protocol-specific connection settings; validated by the uploader
    /// implementation, opaque to the scheduler.
    pub connection: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Destination {
    pub fn new(name: &str, kind: DestinationKind, supported: Vec<Classification>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            kind,
            supported,
            connection: serde_json::Value::Null,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn supports(&self, classification: Classification) -> bool {
        self.supported.contains(&classification)
    }
}

/// Result of a single delivery attempt, as reported by an uploader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub success: bool,
    pub message: String,
    /// URL of the delivered asset, when the destination reports one.
    pub url: Option<String>,
}

/// Category of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BatchStart,
    BatchComplete,
    BatchInterrupted,
    Annotation,
    Upload,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::BatchStart => "batch_start",
            EventType::BatchComplete => "batch_complete",
            EventType::BatchInterrupted => "batch_interrupted",
            EventType::Annotation => "annotation",
            EventType::Upload => "upload",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownValue> {
        match s {
            "batch_start" => Ok(EventType::BatchStart),
            "batch_complete" => Ok(EventType::BatchComplete),
            "batch_interrupted" => Ok(EventType::BatchInterrupted),
            "annotation" => Ok(EventType::Annotation),
            "upload" => Ok(EventType::Upload),
            other => Err(unknown("event type", other)),
        }
    }
}

/// Outcome recorded on an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Started,
    Progress,
    Success,
    Failed,
    Warning,
    Completed,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Started => "started",
            EventOutcome::Progress => "progress",
            EventOutcome::Success => "success",
            EventOutcome::Failed => "failed",
            EventOutcome::Warning => "warning",
            EventOutcome::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownValue> {
        match s {
            "started" => Ok(EventOutcome::Started),
            "progress" => Ok(EventOutcome::Progress),
            "success" => Ok(EventOutcome::Success),
            "failed" => Ok(EventOutcome::Failed),
            "warning" => Ok(EventOutcome::Warning),
            "completed" => Ok(EventOutcome::Completed),
            other => Err(unknown("event outcome", other)),
        }
    }
}

/// One immutable audit record. Append-only; never mutated by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub id: String,
    pub batch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_id: Option<String>,
    pub event_type: EventType,
    pub outcome: EventOutcome,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Progress percentage 0-100 at the time of the event.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
}

impl EventLog {
    pub fn new(
        batch_id: &str,
        photo_id: Option<&str>,
        event_type: EventType,
        outcome: EventOutcome,
        message: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            photo_id: photo_id.map(|p| p.to_string()),
            event_type,
            outcome,
            message: message.to_string(),
            detail: None,
            progress: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100);
        self
    }
}
