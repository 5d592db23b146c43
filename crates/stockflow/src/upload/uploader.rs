//! The uploader seam: one implementation per destination protocol.

use serde::Serialize;
use thiserror::Error;

use crate::model::{Destination, DestinationKind, Photo, UploadOutcome};
use crate::retry::{Classify, ErrorKind};

#[derive(Error, Debug, Clone)]
pub enum UploadError {
    #[error("No uploader registered for kind '{0}'")]
    UnknownKind(String),

    #[error("Invalid destination config: {0}")]
    InvalidConfig(String),

    #[error("{message}")]
    Delivery { message: String, kind: ErrorKind },
}

impl UploadError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Delivery {
            message: message.into(),
            kind: ErrorKind::Transient,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Delivery {
            message: message.into(),
            kind: ErrorKind::Permanent,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::Delivery {
            message: message.into(),
            kind: ErrorKind::RateLimited,
        }
    }
}

impl Classify for UploadError {
    fn kind(&self) -> ErrorKind {
        match self {
            UploadError::UnknownKind(_) | UploadError::InvalidConfig(_) => ErrorKind::Permanent,
            UploadError::Delivery { kind, .. } => *kind,
        }
    }
}

/// Descriptive metadata about a registered uploader.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploaderInfo {
    pub kind: DestinationKind,
    pub name: String,
    pub description: String,
}

/// Delivers photos to one protocol family of destinations.
///
/// Implementations must be safe to call from multiple upload workers at
/// once.
pub trait Uploader: Send + Sync {
    fn info(&self) -> UploaderInfo;

    /// Checks that the destination's connection settings are complete
    /// and well-formed. Called before every upload.
    fn validate(&self, destination: &Destination) -> Result<(), UploadError>;

    /// Verifies the destination is reachable with the configured
    /// credentials, without transferring a photo.
    fn test_connection(&self, destination: &Destination) -> Result<(), UploadError>;

    /// Delivers one photo. A non-success [`UploadOutcome`] is a normal
    /// delivery failure; `Err` means the attempt itself could not be
    /// made.
    fn upload(&self, photo: &Photo, destination: &Destination)
        -> Result<UploadOutcome, UploadError>;
}
