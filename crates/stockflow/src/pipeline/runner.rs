use std::sync::Arc;

use tracing::{info_span, warn};

use crate::db::{photo_repo, Database};
use crate::model::Photo;
use crate::retry::{with_backoff, RetryPolicy};

use super::collaborators::{Annotator, MetadataEmbedder, PhotoPreparer};
use super::error::{PipelineError, PipelineWarning};
use super::progress::{ProgressEvent, ProgressReporter};

/// Result of running one photo through the pipeline. The photo carries
/// whatever the pipeline managed to attach (preview, annotation) so the
/// coordinator can persist final state without re-reading.
pub struct PhotoOutcome {
    pub photo: Photo,
    pub error: Option<PipelineError>,
    pub warnings: Vec<PipelineWarning>,
}

impl PhotoOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// The four-step annotation pipeline for a single photo:
///
/// 1. Prepare a preview and extract context        (10%)
/// 2. Annotate via the AI service                  (30%)
/// 3. Persist the annotation result                (70%)
/// 4. Embed metadata into the original, non-fatal  (90%)
///
/// Steps 1-3 are fatal on failure after retries; step 4 only warns.
/// The pipeline never touches the photo's lifecycle status; the batch
/// coordinator owns that.
pub struct PhotoPipeline {
    db: Database,
    preparer: Arc<dyn PhotoPreparer>,
    annotator: Arc<dyn Annotator>,
    embedder: Arc<dyn MetadataEmbedder>,
    retry: RetryPolicy,
}

impl PhotoPipeline {
    pub fn new(
        db: Database,
        preparer: Arc<dyn PhotoPreparer>,
        annotator: Arc<dyn Annotator>,
        embedder: Arc<dyn MetadataEmbedder>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            db,
            preparer,
            annotator,
            embedder,
            retry,
        }
    }

    /// Runs the full pipeline for one photo.
    pub fn run(
        &self,
        mut photo: Photo,
        batch_description: &str,
        progress: &dyn ProgressReporter,
    ) -> PhotoOutcome {
        let _pipeline_span = info_span!("photo_pipeline",
            photo_id = %photo.id,
            file_name = %photo.file_name,
        )
        .entered();

        let mut warnings = Vec::new();

        // Step 1: prepare preview and context
        let prepared = {
            let _step = info_span!("prepare").entered();
            progress.report(ProgressEvent::Step {
                photo_id: photo.id.clone(),
                percent: 10,
                message: format!("Preparing {} for annotation", photo.file_name),
            });
            match with_backoff(&self.retry, "photo preparation", || {
                self.preparer.prepare(&photo)
            }) {
                Ok(prepared) => prepared,
                Err(e) => {
                    progress.report(ProgressEvent::Failed {
                        photo_id: photo.id.clone(),
                        percent: 10,
                        message: format!("Failed to prepare {}", photo.file_name),
                        detail: e.to_string(),
                    });
                    return PhotoOutcome {
                        photo,
                        error: Some(PipelineError::Prepare(e)),
                        warnings,
                    };
                }
            }
        };

        // Persisting the preview is best-effort; annotation can proceed
        // without it.
        if prepared.preview_path.is_some() || !prepared.context.is_empty() {
            photo.context = prepared.context.clone();
            photo.preview_path = prepared.preview_path.clone();
            if let Some(ref preview) = prepared.preview_path {
                if let Err(e) =
                    photo_repo::set_preview(&self.db, &photo.id, preview, &prepared.context)
                {
                    warn!("Failed to persist preview for {}: {}", photo.file_name, e);
                    warnings.push(PipelineWarning::PreviewNotPersisted {
                        photo_id: photo.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        // Step 2: annotate
        let annotation = {
            let _step = info_span!("annotate").entered();
            progress.report(ProgressEvent::Step {
                photo_id: photo.id.clone(),
                percent: 30,
                message: format!("Annotating {}", photo.file_name),
            });
            match with_backoff(&self.retry, "annotation", || {
                self.annotator.annotate(&photo, batch_description)
            }) {
                Ok(annotation) => annotation,
                Err(e) => {
                    progress.report(ProgressEvent::Failed {
                        photo_id: photo.id.clone(),
                        percent: 30,
                        message: format!("Annotation failed for {}", photo.file_name),
                        detail: e.to_string(),
                    });
                    return PhotoOutcome {
                        photo,
                        error: Some(PipelineError::Annotate(e)),
                        warnings,
                    };
                }
            }
        };

        // Step 3: persist the annotation result
        {
            let _step = info_span!("persist").entered();
            progress.report(ProgressEvent::Step {
                photo_id: photo.id.clone(),
                percent: 70,
                message: format!("Saving annotation for {}", photo.file_name),
            });
            if let Err(e) = with_backoff(&self.retry, "annotation persist", || {
                photo_repo::set_annotation(&self.db, &photo.id, &annotation)
            }) {
                progress.report(ProgressEvent::Failed {
                    photo_id: photo.id.clone(),
                    percent: 70,
                    message: format!("Failed to save annotation for {}", photo.file_name),
                    detail: e.to_string(),
                });
                return PhotoOutcome {
                    photo,
                    error: Some(PipelineError::Persist(e)),
                    warnings,
                };
            }
            photo.annotation = Some(annotation.clone());
        }

        // Step 4: embed metadata into the original file. Never fatal.
        {
            let _step = info_span!("embed").entered();
            progress.report(ProgressEvent::Step {
                photo_id: photo.id.clone(),
                percent: 90,
                message: format!("Embedding metadata into {}", photo.file_name),
            });
            match self.embedder.embed(&photo, &annotation) {
                Ok(()) => {
                    progress.report(ProgressEvent::Annotated {
                        photo_id: photo.id.clone(),
                        title: annotation.title.clone(),
                        keyword_count: annotation.keywords.len(),
                    });
                }
                Err(e) => {
                    warn!(
                        "Metadata embedding failed for {}: {}",
                        photo.file_name, e
                    );
                    progress.report(ProgressEvent::Warning {
                        photo_id: photo.id.clone(),
                        percent: 90,
                        message: format!("Could not embed metadata into {}", photo.file_name),
                        detail: e.to_string(),
                    });
                    warnings.push(PipelineWarning::EmbedFailed {
                        photo_id: photo.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        PhotoOutcome {
            photo,
            error: None,
            warnings,
        }
    }
}
