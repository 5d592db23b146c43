//! Seams to the external services the annotation pipeline calls.
//!
//! The pipeline itself never talks to an image library, an AI endpoint,
//! or an EXIF writer directly; it goes through these traits so tests
//! (and alternate backends) can swap in their own implementations.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::{AnnotationResult, Photo};
use crate::retry::{Classify, ErrorKind};

/// A collaborator failure, tagged with its retry classification at the
/// point where the failure is best understood.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct CollaboratorError {
    pub message: String,
    pub kind: ErrorKind,
}

impl CollaboratorError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Transient,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Permanent,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::RateLimited,
        }
    }
}

impl Classify for CollaboratorError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Output of photo preparation: a downscaled preview for the annotation
/// service plus whatever contextual metadata the preparer extracted.
#[derive(Debug, Clone, Default)]
pub struct PreparedPhoto {
    pub preview_path: Option<PathBuf>,
    pub context: HashMap<String, String>,
}

/// Builds a preview image and extracts contextual metadata.
pub trait PhotoPreparer: Send + Sync {
    fn prepare(&self, photo: &Photo) -> Result<PreparedPhoto, CollaboratorError>;
}

/// Produces stock-photo metadata for a prepared photo.
pub trait Annotator: Send + Sync {
    fn annotate(
        &self,
        photo: &Photo,
        batch_description: &str,
    ) -> Result<AnnotationResult, CollaboratorError>;
}

/// Writes annotation metadata back into the original image file.
pub trait MetadataEmbedder: Send + Sync {
    fn embed(&self, photo: &Photo, annotation: &AnnotationResult) -> Result<(), CollaboratorError>;
}
