//! Shared fixtures for integration tests: an in-memory environment and
//! programmable collaborator/uploader doubles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing_subscriber::EnvFilter;

use stockflow::broadcast::{EventBroadcaster, EventRecorder};
use stockflow::config::AppConfig;
use stockflow::db::{batch_repo, destination_repo, photo_repo, Database};
use stockflow::model::{
    AnnotationResult, Batch, Classification, Destination, DestinationKind, Photo, UploadOutcome,
};
use stockflow::pipeline::{
    Annotator, CollaboratorError, MetadataEmbedder, PhotoPreparer, PreparedPhoto,
};
use stockflow::retry::RetryPolicy;
use stockflow::scheduler::BatchScheduler;
use stockflow::upload::{UploadError, Uploader, UploaderInfo, UploaderRegistry, UploadScheduler};

static TRACING: Once = Once::new();

/// Installs the fmt subscriber once per test binary so pipeline spans
/// show up in failing-test output (filter with `RUST_LOG`).
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub struct TestEnv {
    pub db: Database,
    pub recorder: EventRecorder,
}

impl TestEnv {
    pub fn new() -> Self {
        init_tracing();
        let db = Database::open_in_memory().expect("test database");
        let recorder = EventRecorder::new(db.clone(), EventBroadcaster::new(256));
        Self { db, recorder }
    }

    pub fn config(&self, photo_workers: usize) -> AppConfig {
        AppConfig {
            max_concurrent_batches: 1,
            photo_workers,
            upload_workers: 2,
            poll_interval_ms: 10,
            retry: RetryPolicy::immediate(1),
            ..AppConfig::default()
        }
    }

    pub fn batch_scheduler(
        &self,
        annotator: Arc<dyn Annotator>,
        photo_workers: usize,
    ) -> BatchScheduler {
        BatchScheduler::new(
            self.db.clone(),
            self.recorder.clone(),
            Arc::new(OkPreparer),
            annotator,
            Arc::new(OkEmbedder),
            self.config(photo_workers),
        )
    }

    pub fn upload_scheduler(&self, uploader: Arc<dyn Uploader>) -> UploadScheduler {
        let registry = Arc::new(UploaderRegistry::new());
        registry.register(DestinationKind::Ftp, uploader);
        UploadScheduler::new(
            self.db.clone(),
            self.recorder.clone(),
            registry,
            2,
            RetryPolicy::immediate(1),
        )
    }

    pub fn seed_destination(&self, name: &str, classification: Classification) -> Destination {
        let mut dest = Destination::new(name, DestinationKind::Ftp, vec![classification]);
        dest.connection = serde_json::json!({"host": format!("ftp.{name}.test")});
        destination_repo::upsert(&self.db, &dest).expect("seed destination");
        dest
    }

    pub fn make_batch(&self, classification: Classification, count: usize) -> (Batch, Vec<Photo>) {
        let batch = Batch::new(classification, "integration", "/photos/in");
        let photos = (0..count)
            .map(|i| Photo::new(&batch, format!("/photos/in/img_{i:03}.jpg"), 512))
            .collect();
        (batch, photos)
    }

    pub fn batch_status(&self, batch_id: &str) -> stockflow::model::BatchStatus {
        batch_repo::find_by_id(&self.db, batch_id)
            .unwrap()
            .expect("batch exists")
            .status
    }

    pub fn photo(&self, photo_id: &str) -> Photo {
        photo_repo::find_by_id(&self.db, photo_id)
            .unwrap()
            .expect("photo exists")
    }
}

pub fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

pub fn sample_annotation(photo: &Photo) -> AnnotationResult {
    AnnotationResult {
        classification: photo.classification,
        title: format!("Title for {}", photo.file_name),
        keywords: vec!["stock".to_string(), "test".to_string()],
        quality: 7,
        description: format!("Description of {}", photo.file_name),
        category: "General".to_string(),
    }
}

pub struct OkPreparer;

impl PhotoPreparer for OkPreparer {
    fn prepare(&self, photo: &Photo) -> Result<PreparedPhoto, CollaboratorError> {
        let mut context = HashMap::new();
        context.insert("CameraModel".to_string(), "X-T5".to_string());
        Ok(PreparedPhoto {
            preview_path: Some(PathBuf::from(format!("/tmp/previews/{}.jpg", photo.id))),
            context,
        })
    }
}

pub struct OkEmbedder;

impl MetadataEmbedder for OkEmbedder {
    fn embed(&self, _photo: &Photo, _annotation: &AnnotationResult) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

pub struct OkAnnotator;

impl Annotator for OkAnnotator {
    fn annotate(
        &self,
        photo: &Photo,
        _batch_description: &str,
    ) -> Result<AnnotationResult, CollaboratorError> {
        Ok(sample_annotation(photo))
    }
}

/// Fails annotation for the named files, succeeds otherwise.
pub struct SelectiveAnnotator {
    pub failing_files: Vec<String>,
}

impl Annotator for SelectiveAnnotator {
    fn annotate(
        &self,
        photo: &Photo,
        _batch_description: &str,
    ) -> Result<AnnotationResult, CollaboratorError> {
        if self.failing_files.contains(&photo.file_name) {
            return Err(CollaboratorError::permanent("annotation rejected"));
        }
        Ok(sample_annotation(photo))
    }
}

/// Announces each annotation on `started` and blocks until a permit
/// arrives on `gate`. A closed gate turns into a failure, so dropping
/// the gate sender fails all outstanding annotations.
pub struct GatedAnnotator {
    pub started: Sender<String>,
    pub gate: Receiver<()>,
}

impl Annotator for GatedAnnotator {
    fn annotate(
        &self,
        photo: &Photo,
        _batch_description: &str,
    ) -> Result<AnnotationResult, CollaboratorError> {
        let _ = self.started.send(photo.id.clone());
        match self.gate.recv() {
            Ok(()) => Ok(sample_annotation(photo)),
            Err(_) => Err(CollaboratorError::transient("annotation service unavailable")),
        }
    }
}

/// Uploader double that fails for the named destinations.
pub struct ScriptedUploader {
    pub failing: Vec<String>,
}

impl ScriptedUploader {
    pub fn all_ok() -> Self {
        Self {
            failing: Vec::new(),
        }
    }
}

impl Uploader for ScriptedUploader {
    fn info(&self) -> UploaderInfo {
        UploaderInfo {
            kind: DestinationKind::Ftp,
            name: "scripted".to_string(),
            description: "test double".to_string(),
        }
    }

    fn validate(&self, _destination: &Destination) -> Result<(), UploadError> {
        Ok(())
    }

    fn test_connection(&self, _destination: &Destination) -> Result<(), UploadError> {
        Ok(())
    }

    fn upload(
        &self,
        photo: &Photo,
        destination: &Destination,
    ) -> Result<UploadOutcome, UploadError> {
        if self.failing.contains(&destination.name) {
            return Err(UploadError::permanent("destination refused the file"));
        }
        Ok(UploadOutcome {
            success: true,
            message: "ok".to_string(),
            url: Some(format!("https://{}/{}", destination.name, photo.id)),
        })
    }
}
