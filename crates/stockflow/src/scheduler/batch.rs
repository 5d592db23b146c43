//! Batch processing scheduler.
//!
//! A single dispatch thread polls the persisted queue for the oldest
//! `queued` batch, claims it, and hands it to a per-batch coordinator
//! thread. The coordinator fans photos out to a bounded worker pool and
//! drains results one at a time, checking the stop flag between results
//! so shutdown interrupts a batch cleanly: drained photos keep their
//! final status, undrained photos stay `pending` or `processing`, and
//! the batch stays `processing` until it is explicitly requeued.
//!
//! Two ceilings are enforced independently: `max_concurrent_batches`
//! bounds the number of active coordinators, `photo_workers` bounds
//! parallelism within one batch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{debug, error, info, warn};

use crate::broadcast::EventRecorder;
use crate::config::AppConfig;
use crate::db::{batch_repo, photo_repo, Database};
use crate::error::SchedulerError;
use crate::model::{
    Batch, BatchStatus, EventLog, EventOutcome, EventType, Photo, PhotoStatus,
};
use crate::pipeline::{
    Annotator, MetadataEmbedder, PhotoPipeline, PhotoPreparer, ProgressEvent, ProgressReporter,
    RecorderProgress,
};

use super::job::{PhotoProgress, PhotoWorkState, ProcessingJob, QueueEntry};

type JobMap = Arc<RwLock<HashMap<String, ProcessingJob>>>;

const STOP_POLL: Duration = Duration::from_millis(100);

struct Inner {
    db: Database,
    recorder: EventRecorder,
    pipeline: Arc<PhotoPipeline>,
    config: AppConfig,
    jobs: JobMap,
    coordinators: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    stop: AtomicBool,
}

pub struct BatchScheduler {
    inner: Arc<Inner>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    pub fn new(
        db: Database,
        recorder: EventRecorder,
        preparer: Arc<dyn PhotoPreparer>,
        annotator: Arc<dyn Annotator>,
        embedder: Arc<dyn MetadataEmbedder>,
        config: AppConfig,
    ) -> Self {
        let pipeline = Arc::new(PhotoPipeline::new(
            db.clone(),
            preparer,
            annotator,
            embedder,
            config.retry,
        ));
        Self {
            inner: Arc::new(Inner {
                db,
                recorder,
                pipeline,
                config,
                jobs: Arc::new(RwLock::new(HashMap::new())),
                coordinators: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                stop: AtomicBool::new(false),
            }),
            dispatch: Mutex::new(None),
        }
    }

    /// Persists a batch as `queued` with all its photos `pending`. The
    /// dispatch loop will pick it up on its next poll.
    pub fn add_batch(
        &self,
        mut batch: Batch,
        mut photos: Vec<Photo>,
    ) -> Result<(), SchedulerError> {
        batch.status = BatchStatus::Queued;
        batch_repo::insert(&self.inner.db, &batch)?;
        for photo in &mut photos {
            photo.status = PhotoStatus::Pending;
            photo_repo::insert(&self.inner.db, photo)?;
        }
        info!(
            "Batch {} queued with {} photos",
            batch.id,
            photos.len()
        );
        Ok(())
    }

    /// Starts the dispatch loop. Fails if the scheduler is already
    /// running.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.inner.stop.store(false, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let handle = thread::spawn(move || dispatch_loop(inner));
        *lock(&self.dispatch) = Some(handle);

        info!(
            "Batch scheduler started ({} concurrent batches, {} photo workers)",
            self.inner.config.max_concurrent_batches, self.inner.config.photo_workers
        );
        Ok(())
    }

    /// Signals shutdown and waits for the dispatch loop and all active
    /// batch coordinators to exit. In-flight photos finish; undrained
    /// results are discarded, leaving their photos `pending` or
    /// `processing` for [`Self::requeue`] to reset.
    ///
    /// A worker blocked inside a collaborator call is not joined: it
    /// exits on its own once the call returns, and may persist that
    /// photo's result after this method has returned. Let in-flight
    /// calls settle before requeueing, or the late write races the
    /// reset.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.stop.store(true, Ordering::SeqCst);

        if let Some(handle) = lock(&self.dispatch).take() {
            if handle.join().is_err() {
                error!("Dispatch thread panicked");
            }
        }
        let coordinators: Vec<_> = lock(&self.inner.coordinators).drain(..).collect();
        for handle in coordinators {
            if handle.join().is_err() {
                error!("Batch coordinator panicked");
            }
        }
        info!("Batch scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Live snapshots of the batches currently being processed.
    pub fn active_jobs(&self) -> Vec<ProcessingJob> {
        self.inner
            .jobs
            .read()
            .map(|jobs| jobs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Queue status surface: queued, processing and processed batches
    /// with photo counters, overlaid with live progress where a batch
    /// is active.
    pub fn queue_status(&self) -> Result<Vec<QueueEntry>, SchedulerError> {
        let batches = batch_repo::recent(&self.inner.db, 50)?;
        let mut entries = Vec::new();
        for batch in &batches {
            if !matches!(
                batch.status,
                BatchStatus::Queued | BatchStatus::Processing | BatchStatus::Processed
            ) {
                continue;
            }
            let stats = batch_repo::photo_stats(&self.inner.db, &batch.id)?;
            let mut entry = QueueEntry::from_persisted(batch, stats);
            if let Ok(jobs) = self.inner.jobs.read() {
                if let Some(job) = jobs.get(&batch.id) {
                    entry.overlay(job);
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Explicitly puts an interrupted batch back on the queue. Photos
    /// stranded in `processing` are reset to `pending` so the next run
    /// picks them up again; finished photos keep their status. Call
    /// after [`Self::stop`] has returned and any collaborator call
    /// that was in flight at shutdown has settled.
    pub fn requeue(&self, batch_id: &str) -> Result<(), SchedulerError> {
        let stranded =
            photo_repo::for_batch_with_status(&self.inner.db, batch_id, PhotoStatus::Processing)?;
        for photo in &stranded {
            photo_repo::update_status(&self.inner.db, &photo.id, PhotoStatus::Pending)?;
        }
        batch_repo::requeue(&self.inner.db, batch_id)?;
        info!("Batch {batch_id} requeued ({} photos reset)", stranded.len());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn dispatch_loop(inner: Arc<Inner>) {
    info!("Dispatch loop started");
    while !inner.stop.load(Ordering::SeqCst) {
        // Reap finished coordinators.
        lock(&inner.coordinators).retain(|h| !h.is_finished());

        let active = inner.jobs.read().map(|j| j.len()).unwrap_or(0);
        if active >= inner.config.max_concurrent_batches {
            thread::sleep(STOP_POLL);
            continue;
        }

        let batch = match batch_repo::next_queued(&inner.db) {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                sleep_interruptibly(&inner, inner.config.poll_interval());
                continue;
            }
            Err(e) => {
                error!("Failed to poll batch queue: {e}");
                sleep_interruptibly(&inner, inner.config.poll_interval());
                continue;
            }
        };

        // Claim the batch before spawning so the next poll cannot pick
        // it up again.
        if let Err(e) = batch_repo::advance_status(&inner.db, &batch.id, BatchStatus::Processing) {
            error!("Failed to claim batch {}: {}", batch.id, e);
            sleep_interruptibly(&inner, inner.config.poll_interval());
            continue;
        }
        if let Ok(mut jobs) = inner.jobs.write() {
            jobs.insert(batch.id.clone(), ProcessingJob::new(&batch.id));
        }

        let coordinator_inner = Arc::clone(&inner);
        let batch_id = batch.id.clone();
        let handle = thread::spawn(move || {
            match process_batch(&coordinator_inner, batch) {
                Ok(()) => {}
                Err(SchedulerError::Interrupted { batch_id }) => {
                    info!("Batch {batch_id} interrupted; left in processing for requeue");
                }
                Err(e) => {
                    error!("Batch {batch_id} failed: {e}");
                    if let Err(e2) =
                        batch_repo::advance_status(&coordinator_inner.db, &batch_id, BatchStatus::Failed)
                    {
                        error!("Failed to mark batch {batch_id} failed: {e2}");
                    }
                }
            }
        });
        lock(&inner.coordinators).push(handle);
    }
    info!("Dispatch loop stopped");
}

fn sleep_interruptibly(inner: &Inner, total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() && !inner.stop.load(Ordering::SeqCst) {
        let slice = remaining.min(STOP_POLL);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

/// Removes the live job entry when the coordinator exits, whatever the
/// exit path.
struct JobGuard {
    jobs: JobMap,
    batch_id: String,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if let Ok(mut jobs) = self.jobs.write() {
            jobs.remove(&self.batch_id);
        }
    }
}

/// Bridges pipeline progress onto both the audit log and the live job
/// map.
struct BatchProgress {
    recorder: RecorderProgress,
    jobs: JobMap,
    batch_id: String,
}

impl BatchProgress {
    fn photo_started(&self, photo_id: &str) {
        self.update_photo(photo_id, |p| {
            p.state = PhotoWorkState::Processing;
        });
    }

    fn update_photo<F: FnOnce(&mut PhotoProgress)>(&self, photo_id: &str, f: F) {
        if let Ok(mut jobs) = self.jobs.write() {
            if let Some(job) = jobs.get_mut(&self.batch_id) {
                if let Some(photo) = job.photos.get_mut(photo_id) {
                    f(photo);
                }
            }
        }
    }
}

impl ProgressReporter for BatchProgress {
    fn report(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::Step {
                photo_id, percent, ..
            }
            | ProgressEvent::Warning {
                photo_id, percent, ..
            } => {
                let percent = *percent;
                self.update_photo(photo_id, |p| p.progress = percent);
            }
            ProgressEvent::Failed { photo_id, .. } => {
                self.update_photo(photo_id, |p| p.state = PhotoWorkState::Failed);
            }
            ProgressEvent::Annotated { photo_id, .. } => {
                self.update_photo(photo_id, |p| p.progress = 100);
            }
        }
        self.recorder.report(event);
    }
}

fn pct(done: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        ((done * 100) / total) as u8
    }
}

fn process_batch(inner: &Inner, batch: Batch) -> Result<(), SchedulerError> {
    let _guard = JobGuard {
        jobs: Arc::clone(&inner.jobs),
        batch_id: batch.id.clone(),
    };

    let photos = photo_repo::for_batch_with_status(&inner.db, &batch.id, PhotoStatus::Pending)?;
    let total = photos.len();
    info!("Processing batch {} with {} photos", batch.id, total);

    if total == 0 {
        batch_repo::advance_status(&inner.db, &batch.id, BatchStatus::Processed)?;
        inner.recorder.record(
            EventLog::new(
                &batch.id,
                None,
                EventType::BatchComplete,
                EventOutcome::Completed,
                "Batch complete: no pending photos",
            )
            .with_progress(100),
        );
        return Ok(());
    }

    if let Ok(mut jobs) = inner.jobs.write() {
        if let Some(job) = jobs.get_mut(&batch.id) {
            for photo in &photos {
                job.photos
                    .insert(photo.id.clone(), PhotoProgress::waiting(photo));
            }
        }
    }

    inner.recorder.record(EventLog::new(
        &batch.id,
        None,
        EventType::BatchStart,
        EventOutcome::Started,
        &format!("Started processing batch with {total} photos"),
    ));

    let (photo_tx, photo_rx) = bounded::<Photo>(total);
    let (result_tx, result_rx) = bounded(total);
    for photo in photos {
        // Cannot fail: capacity equals the photo count.
        let _ = photo_tx.send(photo);
    }
    drop(photo_tx);

    let progress = Arc::new(BatchProgress {
        recorder: RecorderProgress::new(inner.recorder.clone(), &batch.id),
        jobs: Arc::clone(&inner.jobs),
        batch_id: batch.id.clone(),
    });

    let worker_count = inner.config.photo_workers.min(total).max(1);
    let mut workers = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let photo_rx = photo_rx.clone();
        let result_tx = result_tx.clone();
        let pipeline = Arc::clone(&inner.pipeline);
        let progress = Arc::clone(&progress);
        let recorder = inner.recorder.clone();
        let db = inner.db.clone();
        let batch_id = batch.id.clone();
        let description = batch.description.clone();
        workers.push(thread::spawn(move || {
            debug!("Photo worker {worker_id} started");
            for photo in photo_rx.iter() {
                progress.photo_started(&photo.id);
                if let Err(e) = photo_repo::update_status(&db, &photo.id, PhotoStatus::Processing) {
                    warn!("Failed to mark {} processing: {e}", photo.file_name);
                }
                recorder.record(EventLog::new(
                    &batch_id,
                    Some(&photo.id),
                    EventType::Annotation,
                    EventOutcome::Started,
                    &format!("Started annotating {} (worker {worker_id})", photo.file_name),
                ));
                let outcome = pipeline.run(photo, &description, progress.as_ref());
                if result_tx.send(outcome).is_err() {
                    // Coordinator is gone; nothing left to report to.
                    break;
                }
            }
            debug!("Photo worker {worker_id} finished");
        }));
    }
    drop(result_tx);

    let mut completed = 0usize;
    let mut succeeded = 0usize;
    for _ in 0..total {
        let outcome = loop {
            if inner.stop.load(Ordering::SeqCst) {
                warn!("Processing stopped, batch {} interrupted", batch.id);
                inner.recorder.record(
                    EventLog::new(
                        &batch.id,
                        None,
                        EventType::BatchInterrupted,
                        EventOutcome::Failed,
                        "Processing interrupted by shutdown",
                    )
                    .with_progress(pct(completed, total)),
                );
                return Err(SchedulerError::Interrupted {
                    batch_id: batch.id.clone(),
                });
            }
            match result_rx.recv_timeout(STOP_POLL) {
                Ok(outcome) => break outcome,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SchedulerError::ChannelClosed);
                }
            }
        };

        completed += 1;
        let photo = &outcome.photo;
        if let Some(error) = &outcome.error {
            photo_repo::update_status(&inner.db, &photo.id, PhotoStatus::Failed)?;
            inner.recorder.record(
                EventLog::new(
                    &batch.id,
                    Some(&photo.id),
                    EventType::Annotation,
                    EventOutcome::Failed,
                    &format!("Annotation failed for {}", photo.file_name),
                )
                .with_detail(&error.to_string()),
            );
            progress.update_photo(&photo.id, |p| {
                p.state = PhotoWorkState::Failed;
                p.error = Some(error.to_string());
            });
        } else {
            succeeded += 1;
            photo_repo::update_status(&inner.db, &photo.id, PhotoStatus::Processed)?;
            inner.recorder.record(
                EventLog::new(
                    &batch.id,
                    Some(&photo.id),
                    EventType::Annotation,
                    EventOutcome::Success,
                    &format!("Annotation of {} completed", photo.file_name),
                )
                .with_progress(100),
            );
            progress.update_photo(&photo.id, |p| {
                p.state = PhotoWorkState::Completed;
                p.progress = 100;
            });
        }

        if let Ok(mut jobs) = inner.jobs.write() {
            if let Some(job) = jobs.get_mut(&batch.id) {
                job.progress = pct(completed, total);
                job.current_photo = Some(photo.file_name.clone());
            }
        }
    }

    for worker in workers {
        let _ = worker.join();
    }

    batch_repo::advance_status(&inner.db, &batch.id, BatchStatus::Processed)?;
    inner.recorder.record(
        EventLog::new(
            &batch.id,
            None,
            EventType::BatchComplete,
            EventOutcome::Completed,
            &format!("Batch complete: {succeeded}/{total} photos annotated"),
        )
        .with_progress(100),
    );
    info!(
        "Batch {} completed: {}/{} photos annotated",
        batch.id, succeeded, total
    );
    Ok(())
}
