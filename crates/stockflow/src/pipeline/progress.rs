//! Progress reporting for a single photo moving through the pipeline.

use crate::broadcast::EventRecorder;
use crate::model::{EventLog, EventOutcome, EventType};

/// Milestones emitted by [`super::PhotoPipeline`] while processing one
/// photo.
pub enum ProgressEvent {
    /// Entering a pipeline step, with overall percentage for this photo.
    Step {
        photo_id: String,
        percent: u8,
        message: String,
    },
    /// Non-fatal problem; processing continues.
    Warning {
        photo_id: String,
        percent: u8,
        message: String,
        detail: String,
    },
    /// Fatal step failure; the photo is done.
    Failed {
        photo_id: String,
        percent: u8,
        message: String,
        detail: String,
    },
    /// All steps finished, including metadata embedding.
    Annotated {
        photo_id: String,
        title: String,
        keyword_count: usize,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges pipeline progress onto the audit log and broadcast channel.
pub struct RecorderProgress {
    recorder: EventRecorder,
    batch_id: String,
}

impl RecorderProgress {
    pub fn new(recorder: EventRecorder, batch_id: &str) -> Self {
        Self {
            recorder,
            batch_id: batch_id.to_string(),
        }
    }
}

impl ProgressReporter for RecorderProgress {
    fn report(&self, event: ProgressEvent) {
        let event = match event {
            ProgressEvent::Step {
                photo_id,
                percent,
                message,
            } => EventLog::new(
                &self.batch_id,
                Some(&photo_id),
                EventType::Annotation,
                EventOutcome::Progress,
                &message,
            )
            .with_progress(percent),
            ProgressEvent::Warning {
                photo_id,
                percent,
                message,
                detail,
            } => EventLog::new(
                &self.batch_id,
                Some(&photo_id),
                EventType::Annotation,
                EventOutcome::Warning,
                &message,
            )
            .with_detail(&detail)
            .with_progress(percent),
            ProgressEvent::Failed {
                photo_id,
                percent,
                message,
                detail,
            } => EventLog::new(
                &self.batch_id,
                Some(&photo_id),
                EventType::Annotation,
                EventOutcome::Failed,
                &message,
            )
            .with_detail(&detail)
            .with_progress(percent),
            ProgressEvent::Annotated {
                photo_id,
                title,
                keyword_count,
            } => EventLog::new(
                &self.batch_id,
                Some(&photo_id),
                EventType::Annotation,
                EventOutcome::Success,
                "Annotation completed",
            )
            .with_detail(&format!("title: {title}, keywords: {keyword_count}"))
            .with_progress(100),
        };
        self.recorder.record(event);
    }
}
