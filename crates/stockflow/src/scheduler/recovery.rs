//! Startup reconciliation after an unclean shutdown.
//!
//! Persisted state can be left mid-flight when the process dies:
//! photos `processing`, batches `processing`, uploads `uploading`.
//! Running this sweep before starting the schedulers returns all of it
//! to a resumable state. Terminal statuses are never touched.

use std::collections::HashMap;

use log::info;
use rusqlite::params;
use serde::Serialize;

use crate::db::{to_ts, Database, DatabaseError};
use crate::model::DestinationStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Photos returned from `processing` to `pending`.
    pub photos_reset: usize,
    /// Batches returned from `processing` to `queued`.
    pub batches_requeued: usize,
    /// Photos returned from `uploading` to `approved`.
    pub uploads_reset: usize,
}

/// Sweeps mid-flight state back to resumable statuses. Intended to run
/// once at startup, before either scheduler starts.
pub fn reconcile(db: &Database) -> Result<RecoveryReport, DatabaseError> {
    let photos_reset = db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE photos SET status = 'pending', updated_at = ?1 WHERE status = 'processing'",
            params![to_ts(chrono::Utc::now())],
        )?;
        Ok(n)
    })?;

    let batches_requeued = db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE batches SET status = 'queued', updated_at = ?1 WHERE status = 'processing'",
            params![to_ts(chrono::Utc::now())],
        )?;
        Ok(n)
    })?;

    // Photos stranded mid-upload return to `approved`; non-terminal
    // destination entries are reset so a fresh queue attempt retries
    // them without discarding completed deliveries.
    let uploading: Vec<(String, Option<String>)> = db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT id, upload_status FROM photos WHERE status = 'uploading'")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    for (id, upload_status) in &uploading {
        let mut map: HashMap<String, DestinationStatus> = match upload_status.as_deref() {
            Some(json) if !json.is_empty() => serde_json::from_str(json).unwrap_or_default(),
            _ => HashMap::new(),
        };
        for status in map.values_mut() {
            if !status.is_terminal() {
                *status = DestinationStatus::Pending;
            }
        }
        let json = serde_json::to_string(&map)?;
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE photos SET status = 'approved', upload_status = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id, json, to_ts(chrono::Utc::now())],
            )?;
            Ok(())
        })?;
    }

    let report = RecoveryReport {
        photos_reset,
        batches_requeued,
        uploads_reset: uploading.len(),
    };
    if report != RecoveryReport::default() {
        info!(
            "Recovery sweep: {} photos reset, {} batches requeued, {} uploads reset",
            report.photos_reset, report.batches_requeued, report.uploads_reset
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{batch_repo, photo_repo};
    use crate::model::{Batch, BatchStatus, Classification, Photo, PhotoStatus};

    fn seed(db: &Database, batch_status: BatchStatus, photo_status: PhotoStatus) -> (Batch, Photo) {
        let mut batch = Batch::new(Classification::Editorial, "d", "/in");
        batch.status = batch_status;
        batch_repo::insert(db, &batch).unwrap();
        let mut photo = Photo::new(&batch, "/in/a.jpg", 1);
        photo.status = photo_status;
        photo_repo::insert(db, &photo).unwrap();
        (batch, photo)
    }

    #[test]
    fn test_clean_state_reports_nothing() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, BatchStatus::Processed, PhotoStatus::Processed);
        let report = reconcile(&db).unwrap();
        assert_eq!(report, RecoveryReport::default());
    }

    #[test]
    fn test_processing_state_is_reset() {
        let db = Database::open_in_memory().unwrap();
        let (batch, photo) = seed(&db, BatchStatus::Processing, PhotoStatus::Processing);

        let report = reconcile(&db).unwrap();
        assert_eq!(report.photos_reset, 1);
        assert_eq!(report.batches_requeued, 1);

        assert_eq!(
            batch_repo::find_by_id(&db, &batch.id).unwrap().unwrap().status,
            BatchStatus::Queued
        );
        assert_eq!(
            photo_repo::find_by_id(&db, &photo.id).unwrap().unwrap().status,
            PhotoStatus::Pending
        );
    }

    #[test]
    fn test_uploading_photo_returns_to_approved() {
        let db = Database::open_in_memory().unwrap();
        let (_batch, photo) = seed(&db, BatchStatus::Processed, PhotoStatus::Uploading);
        photo_repo::set_destination_status(&db, &photo.id, "d1", DestinationStatus::Uploaded)
            .unwrap();
        photo_repo::set_destination_status(&db, &photo.id, "d2", DestinationStatus::Uploading)
            .unwrap();
        photo_repo::set_destination_status(&db, &photo.id, "d3", DestinationStatus::Queued)
            .unwrap();

        let report = reconcile(&db).unwrap();
        assert_eq!(report.uploads_reset, 1);

        let stored = photo_repo::find_by_id(&db, &photo.id).unwrap().unwrap();
        assert_eq!(stored.status, PhotoStatus::Approved);
        // Completed deliveries survive; in-flight ones are retriable.
        assert_eq!(
            stored.upload_status.get("d1"),
            Some(&DestinationStatus::Uploaded)
        );
        assert_eq!(
            stored.upload_status.get("d2"),
            Some(&DestinationStatus::Pending)
        );
        assert_eq!(
            stored.upload_status.get("d3"),
            Some(&DestinationStatus::Pending)
        );
    }

    #[test]
    fn test_terminal_statuses_untouched() {
        let db = Database::open_in_memory().unwrap();
        let (_batch, photo) = seed(&db, BatchStatus::Failed, PhotoStatus::Uploaded);
        reconcile(&db).unwrap();
        assert_eq!(
            photo_repo::find_by_id(&db, &photo.id).unwrap().unwrap().status,
            PhotoStatus::Uploaded
        );
    }
}
