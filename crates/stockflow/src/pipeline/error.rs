use thiserror::Error;

use crate::db::DatabaseError;
use crate::retry::{Classify, ErrorKind};

use super::collaborators::CollaboratorError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Photo preparation failed: {0}")]
    Prepare(CollaboratorError),

    #[error("Annotation failed: {0}")]
    Annotate(CollaboratorError),

    #[error("Failed to persist annotation: {0}")]
    Persist(#[from] DatabaseError),
}

impl Classify for PipelineError {
    fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Prepare(e) | PipelineError::Annotate(e) => e.kind,
            PipelineError::Persist(e) => e.kind(),
        }
    }
}

/// Non-fatal problems encountered while processing one photo.
#[derive(Debug, Clone)]
pub enum PipelineWarning {
    EmbedFailed { photo_id: String, error: String },
    PreviewNotPersisted { photo_id: String, error: String },
}
