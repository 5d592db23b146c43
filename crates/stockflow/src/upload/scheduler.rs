//! Upload dispatch scheduler.
//!
//! Approved photos are turned into upload jobs on a bounded in-memory
//! channel; a small fixed pool of workers drains it. Each job delivers
//! one photo to every eligible destination sequentially and flushes the
//! per-destination status to the database immediately after every
//! attempt, so a crash mid-job loses at most the attempt in flight.
//!
//! Stopping is blocking: workers finish their in-flight job, then the
//! pool is joined. Jobs still sitting in the channel survive a
//! stop/start cycle; photos whose jobs never made it into the channel
//! stay `queued` and are re-enqueued by [`UploadScheduler::requeue_stranded`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::broadcast::EventRecorder;
use crate::db::{batch_repo, destination_repo, photo_repo, Database};
use crate::error::DispatchError;
use crate::model::{
    Destination, DestinationStatus, EventLog, EventOutcome, EventType, Photo, PhotoStatus,
    UploadOutcome,
};
use crate::retry::{with_backoff, RetryPolicy};

use super::registry::UploaderRegistry;
use super::uploader::UploadError;

const QUEUE_CAPACITY: usize = 100;
const STOP_POLL: Duration = Duration::from_millis(100);

struct UploadJob {
    photo: Photo,
    batch_id: String,
    destinations: Vec<Destination>,
}

/// Serializable snapshot of one in-flight upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUpload {
    pub photo_id: String,
    pub file_name: String,
    pub started_at: DateTime<Utc>,
    /// destination id -> live delivery status.
    pub progress: HashMap<String, DestinationStatus>,
}

/// Snapshot of the whole upload queue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQueueStatus {
    pub is_processing: bool,
    pub active_uploads: usize,
    pub queue_length: usize,
    pub max_concurrent: usize,
    pub active_jobs: Vec<ActiveUpload>,
}

struct Inner {
    db: Database,
    recorder: EventRecorder,
    registry: Arc<UploaderRegistry>,
    retry: RetryPolicy,
    worker_count: usize,
    active: RwLock<HashMap<String, ActiveUpload>>,
    job_tx: Sender<UploadJob>,
    job_rx: Receiver<UploadJob>,
    running: AtomicBool,
    stop: AtomicBool,
}

pub struct UploadScheduler {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl UploadScheduler {
    pub fn new(
        db: Database,
        recorder: EventRecorder,
        registry: Arc<UploaderRegistry>,
        worker_count: usize,
        retry: RetryPolicy,
    ) -> Self {
        let (job_tx, job_rx) = bounded(QUEUE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                db,
                recorder,
                registry,
                retry,
                worker_count: worker_count.max(1),
                active: RwLock::new(HashMap::new()),
                job_tx,
                job_rx,
                running: AtomicBool::new(false),
                stop: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Starts the worker pool. Fails if already running.
    pub fn start(&self) -> Result<(), DispatchError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::AlreadyRunning);
        }
        self.inner.stop.store(false, Ordering::SeqCst);

        let mut workers = lock(&self.workers);
        for worker_id in 0..self.inner.worker_count {
            let inner = Arc::clone(&self.inner);
            workers.push(thread::spawn(move || upload_worker(inner, worker_id)));
        }
        info!(
            "Upload dispatcher started with {} workers",
            self.inner.worker_count
        );
        Ok(())
    }

    /// Signals shutdown and blocks until every in-flight upload job has
    /// finished. The scheduler can be started again afterwards; jobs
    /// still in the channel are processed by the next run.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping upload dispatcher...");
        self.inner.stop.store(true, Ordering::SeqCst);
        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("Upload worker panicked");
            }
        }
        info!("Upload dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Enqueues photos of a batch for delivery to every active
    /// destination matching the batch classification. Returns the
    /// number of jobs actually placed on the channel; photos that did
    /// not fit stay `queued` for a later [`Self::requeue_stranded`].
    pub fn queue_photos_for_upload(
        &self,
        batch_id: &str,
        photo_ids: &[String],
    ) -> Result<usize, DispatchError> {
        let batch = batch_repo::find_by_id(&self.inner.db, batch_id)?.ok_or_else(|| {
            DispatchError::Database(crate::db::DatabaseError::NotFound {
                what: "batch",
                id: batch_id.to_string(),
            })
        })?;
        let destinations = destination_repo::active_for(&self.inner.db, batch.classification)?;
        if destinations.is_empty() {
            return Err(DispatchError::NoActiveDestinations {
                classification: batch.classification.as_str().to_string(),
            });
        }

        let mut enqueued = 0;
        for photo_id in photo_ids {
            let photo = match photo_repo::find_by_id(&self.inner.db, photo_id)? {
                Some(photo) => photo,
                None => {
                    warn!("Skipping unknown photo {photo_id}");
                    continue;
                }
            };
            photo_repo::update_status(&self.inner.db, photo_id, PhotoStatus::Queued)?;
            for dest in &destinations {
                photo_repo::set_destination_status(
                    &self.inner.db,
                    photo_id,
                    &dest.id,
                    DestinationStatus::Queued,
                )?;
            }

            let job = UploadJob {
                photo,
                batch_id: batch_id.to_string(),
                destinations: destinations.clone(),
            };
            match self.inner.job_tx.try_send(job) {
                Ok(()) => {
                    enqueued += 1;
                    debug!(
                        "Photo {photo_id} queued for upload to {} destinations",
                        destinations.len()
                    );
                }
                Err(TrySendError::Full(_)) => {
                    warn!("Upload queue is full, photo {photo_id} left queued");
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!("Upload queue closed, photo {photo_id} left queued");
                }
            }
        }
        Ok(enqueued)
    }

    /// Re-enqueues photos of a batch stuck in `queued`, e.g. after the
    /// channel was full or the process restarted.
    pub fn requeue_stranded(&self, batch_id: &str) -> Result<usize, DispatchError> {
        let stranded =
            photo_repo::for_batch_with_status(&self.inner.db, batch_id, PhotoStatus::Queued)?;
        if stranded.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = stranded.into_iter().map(|p| p.id).collect();
        self.queue_photos_for_upload(batch_id, &ids)
    }

    pub fn status(&self) -> UploadQueueStatus {
        let active_jobs: Vec<ActiveUpload> = self
            .inner
            .active
            .read()
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default();
        UploadQueueStatus {
            is_processing: self.is_running(),
            active_uploads: active_jobs.len(),
            queue_length: self.inner.job_rx.len(),
            max_concurrent: self.inner.worker_count,
            active_jobs,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn upload_worker(inner: Arc<Inner>, worker_id: usize) {
    debug!("Upload worker {worker_id} started");
    loop {
        if inner.stop.load(Ordering::SeqCst) {
            break;
        }
        match inner.job_rx.recv_timeout(STOP_POLL) {
            Ok(job) => {
                if let Err(e) = process_upload_job(&inner, worker_id, job) {
                    error!("Upload worker {worker_id}: job failed: {e}");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Upload worker {worker_id} stopped");
}

/// Removes the active-map entry when the job finishes, whatever the
/// exit path.
struct ActiveGuard<'a> {
    inner: &'a Inner,
    photo_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.inner.active.write() {
            active.remove(&self.photo_id);
        }
    }
}

fn set_live_progress(inner: &Inner, photo_id: &str, dest_id: &str, status: DestinationStatus) {
    if let Ok(mut active) = inner.active.write() {
        if let Some(job) = active.get_mut(photo_id) {
            job.progress.insert(dest_id.to_string(), status);
        }
    }
}

fn process_upload_job(
    inner: &Inner,
    worker_id: usize,
    job: UploadJob,
) -> Result<(), DispatchError> {
    let photo = &job.photo;
    info!(
        "Upload worker {worker_id}: starting {} ({} destinations)",
        photo.file_name,
        job.destinations.len()
    );

    if let Ok(mut active) = inner.active.write() {
        active.insert(
            photo.id.clone(),
            ActiveUpload {
                photo_id: photo.id.clone(),
                file_name: photo.file_name.clone(),
                started_at: Utc::now(),
                progress: job
                    .destinations
                    .iter()
                    .map(|d| (d.id.clone(), DestinationStatus::Pending))
                    .collect(),
            },
        );
    }
    let _guard = ActiveGuard {
        inner,
        photo_id: photo.id.clone(),
    };

    photo_repo::update_status(&inner.db, &photo.id, PhotoStatus::Uploading)?;

    let mut succeeded = 0u32;
    let mut failed = 0u32;

    for dest in &job.destinations {
        set_live_progress(inner, &photo.id, &dest.id, DestinationStatus::Uploading);
        flush_destination_status(inner, &photo.id, &dest.id, DestinationStatus::Uploading)?;
        inner.recorder.record(EventLog::new(
            &job.batch_id,
            Some(&photo.id),
            EventType::Upload,
            EventOutcome::Started,
            &format!(
                "Started upload of {} to {} (worker {worker_id})",
                photo.file_name, dest.name
            ),
        ));

        let attempt = catch_unwind(AssertUnwindSafe(|| {
            with_backoff(&inner.retry, "upload", || {
                inner.registry.upload_photo(photo, dest)
            })
        }));
        let result: Result<UploadOutcome, UploadError> = match attempt {
            Ok(result) => result,
            Err(_) => Err(UploadError::permanent("uploader panicked")),
        };

        match result {
            Ok(outcome) if outcome.success => {
                set_live_progress(inner, &photo.id, &dest.id, DestinationStatus::Uploaded);
                flush_destination_status(inner, &photo.id, &dest.id, DestinationStatus::Uploaded)?;
                inner.recorder.record(
                    EventLog::new(
                        &job.batch_id,
                        Some(&photo.id),
                        EventType::Upload,
                        EventOutcome::Success,
                        &format!("{} uploaded to {}", photo.file_name, dest.name),
                    )
                    .with_progress(100),
                );
                succeeded += 1;
            }
            Ok(outcome) => {
                record_destination_failure(inner, &job, dest, &outcome.message)?;
                failed += 1;
            }
            Err(e) => {
                record_destination_failure(inner, &job, dest, &e.to_string())?;
                failed += 1;
            }
        }
    }

    let final_status = if succeeded > 0 && failed == 0 {
        PhotoStatus::Uploaded
    } else if succeeded == 0 {
        PhotoStatus::UploadFailed
    } else {
        PhotoStatus::PartiallyUploaded
    };
    photo_repo::update_status(&inner.db, &photo.id, final_status)?;
    inner.recorder.record(
        EventLog::new(
            &job.batch_id,
            Some(&photo.id),
            EventType::Upload,
            EventOutcome::Completed,
            &format!(
                "Upload of {} finished. Succeeded: {succeeded}, failed: {failed}",
                photo.file_name
            ),
        )
        .with_progress(100),
    );
    info!(
        "Upload worker {worker_id}: finished {} (succeeded {succeeded}, failed {failed})",
        photo.file_name
    );
    Ok(())
}

fn record_destination_failure(
    inner: &Inner,
    job: &UploadJob,
    dest: &Destination,
    detail: &str,
) -> Result<(), DispatchError> {
    warn!(
        "Upload of {} to {} failed: {detail}",
        job.photo.file_name, dest.name
    );
    set_live_progress(inner, &job.photo.id, &dest.id, DestinationStatus::Failed);
    flush_destination_status(inner, &job.photo.id, &dest.id, DestinationStatus::Failed)?;
    inner.recorder.record(
        EventLog::new(
            &job.batch_id,
            Some(&job.photo.id),
            EventType::Upload,
            EventOutcome::Failed,
            &format!("Upload of {} to {} failed", job.photo.file_name, dest.name),
        )
        .with_detail(detail),
    );
    Ok(())
}

/// Immediate per-destination flush, retried on transient store errors
/// (a busy database under concurrent flushes is expected).
fn flush_destination_status(
    inner: &Inner,
    photo_id: &str,
    dest_id: &str,
    status: DestinationStatus,
) -> Result<(), DispatchError> {
    with_backoff(&inner.retry, "upload status flush", || {
        photo_repo::set_destination_status(&inner.db, photo_id, dest_id, status)
    })
    .map_err(DispatchError::Database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::broadcast::EventBroadcaster;
    use crate::db::event_repo;
    use crate::model::{Batch, Classification, DestinationKind};
    use crate::upload::uploader::{Uploader, UploaderInfo};

    /// Succeeds or fails per destination name.
    struct ScriptedUploader {
        failing: Vec<String>,
        panicking: Vec<String>,
    }

    impl ScriptedUploader {
        fn all_ok() -> Self {
            Self {
                failing: Vec::new(),
                panicking: Vec::new(),
            }
        }
    }

    impl Uploader for ScriptedUploader {
        fn info(&self) -> UploaderInfo {
            UploaderInfo {
                kind: DestinationKind::Ftp,
                name: "scripted".to_string(),
                description: String::new(),
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
            _photo: &Photo,
            destination: &Destination,
        ) -> Result<UploadOutcome, UploadError> {
            if self.panicking.contains(&destination.name) {
                panic!("scripted panic");
            }
            if self.failing.contains(&destination.name) {
                return Err(UploadError::permanent("scripted failure"));
            }
            Ok(UploadOutcome {
                success: true,
                message: "ok".to_string(),
                url: Some(format!("https://{}/asset", destination.name)),
            })
        }
    }

    struct Fixture {
        db: Database,
        scheduler: UploadScheduler,
        batch: Batch,
        photo: Photo,
        destinations: Vec<Destination>,
    }

    fn fixture(uploader: ScriptedUploader, dest_names: &[&str]) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let registry = Arc::new(UploaderRegistry::new());
        registry.register(DestinationKind::Ftp, Arc::new(uploader));
        let recorder = EventRecorder::new(db.clone(), EventBroadcaster::new(64));
        let scheduler = UploadScheduler::new(
            db.clone(),
            recorder,
            registry,
            2,
            RetryPolicy::immediate(2),
        );

        let batch = Batch::new(Classification::Commercial, "studio", "/in");
        batch_repo::insert(&db, &batch).unwrap();
        let mut photo = Photo::new(&batch, "/in/a.jpg", 100);
        photo.status = PhotoStatus::Approved;
        photo_repo::insert(&db, &photo).unwrap();

        let mut destinations = Vec::new();
        for (i, name) in dest_names.iter().enumerate() {
            let mut dest =
                Destination::new(name, DestinationKind::Ftp, vec![Classification::Commercial]);
            dest.created_at = Utc::now() + chrono::Duration::seconds(i as i64);
            destination_repo::upsert(&db, &dest).unwrap();
            destinations.push(dest);
        }

        Fixture {
            db,
            scheduler,
            batch,
            photo,
            destinations,
        }
    }

    fn wait_for_status(db: &Database, photo_id: &str, expect: PhotoStatus) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = photo_repo::find_by_id(db, photo_id).unwrap().unwrap().status;
            if status == expect {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "photo never reached {expect:?}, still {status:?}"
            );
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_no_active_destinations_is_error() {
        let f = fixture(ScriptedUploader::all_ok(), &[]);
        let err = f
            .scheduler
            .queue_photos_for_upload(&f.batch.id, &[f.photo.id.clone()])
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoActiveDestinations { .. }));
    }

    #[test]
    fn test_all_destinations_succeed() {
        let f = fixture(ScriptedUploader::all_ok(), &["alamy", "getty"]);
        f.scheduler.start().unwrap();
        let enqueued = f
            .scheduler
            .queue_photos_for_upload(&f.batch.id, &[f.photo.id.clone()])
            .unwrap();
        assert_eq!(enqueued, 1);

        wait_for_status(&f.db, &f.photo.id, PhotoStatus::Uploaded);
        f.scheduler.stop();

        let stored = photo_repo::find_by_id(&f.db, &f.photo.id).unwrap().unwrap();
        for dest in &f.destinations {
            assert_eq!(
                stored.upload_status.get(&dest.id),
                Some(&DestinationStatus::Uploaded)
            );
        }
        let events = event_repo::for_photo(&f.db, &f.photo.id, 0).unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::Upload && e.outcome == EventOutcome::Completed));
    }

    #[test]
    fn test_mixed_results_partially_uploaded() {
        let f = fixture(
            ScriptedUploader {
                failing: vec!["getty".to_string()],
                panicking: Vec::new(),
            },
            &["alamy", "getty"],
        );
        f.scheduler.start().unwrap();
        f.scheduler
            .queue_photos_for_upload(&f.batch.id, &[f.photo.id.clone()])
            .unwrap();

        wait_for_status(&f.db, &f.photo.id, PhotoStatus::PartiallyUploaded);
        f.scheduler.stop();

        let stored = photo_repo::find_by_id(&f.db, &f.photo.id).unwrap().unwrap();
        assert_eq!(
            stored.upload_status.get(&f.destinations[0].id),
            Some(&DestinationStatus::Uploaded)
        );
        assert_eq!(
            stored.upload_status.get(&f.destinations[1].id),
            Some(&DestinationStatus::Failed)
        );
    }

    #[test]
    fn test_all_failures_upload_failed() {
        let f = fixture(
            ScriptedUploader {
                failing: vec!["alamy".to_string()],
                panicking: Vec::new(),
            },
            &["alamy"],
        );
        f.scheduler.start().unwrap();
        f.scheduler
            .queue_photos_for_upload(&f.batch.id, &[f.photo.id.clone()])
            .unwrap();

        wait_for_status(&f.db, &f.photo.id, PhotoStatus::UploadFailed);
        f.scheduler.stop();
    }

    #[test]
    fn test_panicking_uploader_counts_as_failure() {
        let f = fixture(
            ScriptedUploader {
                failing: Vec::new(),
                panicking: vec!["alamy".to_string()],
            },
            &["alamy", "getty"],
        );
        f.scheduler.start().unwrap();
        f.scheduler
            .queue_photos_for_upload(&f.batch.id, &[f.photo.id.clone()])
            .unwrap();

        // The panic is contained to one destination; the other is still
        // attempted and the worker stays alive.
        wait_for_status(&f.db, &f.photo.id, PhotoStatus::PartiallyUploaded);
        f.scheduler.stop();
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let f = fixture(ScriptedUploader::all_ok(), &["alamy"]);
        f.scheduler.start().unwrap();
        assert!(matches!(
            f.scheduler.start(),
            Err(DispatchError::AlreadyRunning)
        ));
        f.scheduler.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let f = fixture(ScriptedUploader::all_ok(), &["alamy"]);
        f.scheduler.start().unwrap();
        f.scheduler.stop();
        f.scheduler.start().unwrap();
        f.scheduler
            .queue_photos_for_upload(&f.batch.id, &[f.photo.id.clone()])
            .unwrap();
        wait_for_status(&f.db, &f.photo.id, PhotoStatus::Uploaded);
        f.scheduler.stop();
    }

    #[test]
    fn test_requeue_stranded() {
        let f = fixture(ScriptedUploader::all_ok(), &["alamy"]);
        // Simulate a photo left behind by a full queue or a restart.
        photo_repo::update_status(&f.db, &f.photo.id, PhotoStatus::Queued).unwrap();

        f.scheduler.start().unwrap();
        let requeued = f.scheduler.requeue_stranded(&f.batch.id).unwrap();
        assert_eq!(requeued, 1);
        wait_for_status(&f.db, &f.photo.id, PhotoStatus::Uploaded);
        f.scheduler.stop();

        // Nothing left stranded.
        assert_eq!(f.scheduler.requeue_stranded(&f.batch.id).unwrap(), 0);
    }

    #[test]
    fn test_status_snapshot() {
        let f = fixture(ScriptedUploader::all_ok(), &["alamy"]);
        let status = f.scheduler.status();
        assert!(!status.is_processing);
        assert_eq!(status.active_uploads, 0);
        assert_eq!(status.queue_length, 0);
        assert_eq!(status.max_concurrent, 2);
    }
}
