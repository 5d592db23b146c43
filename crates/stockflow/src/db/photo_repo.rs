//! Photo repository — CRUD, review transitions, and upload-status
//! bookkeeping for the `photos` table.
//!
//! The scheduler has exclusive write authority over status fields; all
//! transitions funnel through here so the legality checks live in one
//! place.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Row};

use crate::model::{
    AnnotationResult, Classification, DestinationStatus, Photo, PhotoStatus,
};

use super::{parse_ts, to_ts, Database, DatabaseError};

fn from_row(row: &Row<'_>) -> Result<Photo, DatabaseError> {
    let classification: String = row.get("classification")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let original_path: String = row.get("original_path")?;
    let preview_path: Option<String> = row.get("preview_path")?;
    let context: Option<String> = row.get("context")?;
    let annotation: Option<String> = row.get("annotation")?;
    let upload_status: Option<String> = row.get("upload_status")?;

    let context: HashMap<String, String> = match context.as_deref() {
        Some(json) if !json.is_empty() => serde_json::from_str(json)?,
        _ => HashMap::new(),
    };
    let annotation: Option<AnnotationResult> = match annotation.as_deref() {
        Some(json) if !json.is_empty() => Some(serde_json::from_str(json)?),
        _ => None,
    };
    let upload_status: HashMap<String, DestinationStatus> = match upload_status.as_deref() {
        Some(json) if !json.is_empty() => serde_json::from_str(json)?,
        _ => HashMap::new(),
    };

    Ok(Photo {
        id: row.get("id")?,
        batch_id: row.get("batch_id")?,
        classification: Classification::parse(&classification)?,
        original_path: original_path.into(),
        preview_path: preview_path.map(Into::into),
        file_name: row.get("file_name")?,
        file_size: row.get::<_, i64>("file_size")? as u64,
        context,
        annotation,
        upload_status,
        status: PhotoStatus::parse(&status)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Inserts a new photo row.
pub fn insert(db: &Database, photo: &Photo) -> Result<(), DatabaseError> {
    let context = serde_json::to_string(&photo.context)?;
    let annotation = photo
        .annotation
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let upload_status = serde_json::to_string(&photo.upload_status)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO photos (id, batch_id, classification, original_path, preview_path,
             file_name, file_size, context, annotation, upload_status, status,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                photo.id,
                photo.batch_id,
                photo.classification.as_str(),
                photo.original_path.to_string_lossy(),
                photo.preview_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                photo.file_name,
                photo.file_size as i64,
                context,
                annotation,
                upload_status,
                photo.status.as_str(),
                to_ts(photo.created_at),
                to_ts(photo.updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Finds a photo by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Photo>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM photos WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// All photos of a batch, in creation order.
pub fn for_batch(db: &Database, batch_id: &str) -> Result<Vec<Photo>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM photos WHERE batch_id = ?1 ORDER BY created_at ASC")?;
        let mut rows = stmt.query(params![batch_id])?;
        let mut photos = Vec::new();
        while let Some(row) = rows.next()? {
            photos.push(from_row(row)?);
        }
        Ok(photos)
    })
}

/// Photos of a batch currently in the given status.
pub fn for_batch_with_status(
    db: &Database,
    batch_id: &str,
    status: PhotoStatus,
) -> Result<Vec<Photo>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM photos WHERE batch_id = ?1 AND status = ?2 ORDER BY created_at ASC",
        )?;
        let mut rows = stmt.query(params![batch_id, status.as_str()])?;
        let mut photos = Vec::new();
        while let Some(row) = rows.next()? {
            photos.push(from_row(row)?);
        }
        Ok(photos)
    })
}

/// Updates only the status and updated_at of a photo.
pub fn update_status(db: &Database, id: &str, status: PhotoStatus) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE photos SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), to_ts(chrono::Utc::now())],
        )?;
        Ok(())
    })
}

/// Records the preparer's output: preview path and contextual metadata.
pub fn set_preview(
    db: &Database,
    id: &str,
    preview_path: &Path,
    context: &HashMap<String, String>,
) -> Result<(), DatabaseError> {
    let context = serde_json::to_string(context)?;
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE photos SET preview_path = ?2, context = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                id,
                preview_path.to_string_lossy(),
                context,
                to_ts(chrono::Utc::now())
            ],
        )?;
        Ok(())
    })
}

/// Persists an annotation result and moves the photo to `processed`.
pub fn set_annotation(
    db: &Database,
    id: &str,
    result: &AnnotationResult,
) -> Result<(), DatabaseError> {
    let annotation = serde_json::to_string(result)?;
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE photos SET annotation = ?2, status = 'processed', updated_at = ?3
             WHERE id = ?1",
            params![id, annotation, to_ts(chrono::Utc::now())],
        )?;
        Ok(())
    })
}

/// Flushes one destination's delivery status into the photo's persisted
/// upload-status map. Read-modify-write runs under a single connection
/// lock so concurrent flushes for the same photo serialize.
pub fn set_destination_status(
    db: &Database,
    photo_id: &str,
    destination_id: &str,
    status: DestinationStatus,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let current: Option<String> = conn
            .query_row(
                "SELECT upload_status FROM photos WHERE id = ?1",
                params![photo_id],
                |r| r.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                    what: "photo",
                    id: photo_id.to_string(),
                },
                other => DatabaseError::Sqlite(other),
            })?;

        let mut map: HashMap<String, DestinationStatus> = match current.as_deref() {
            Some(json) if !json.is_empty() => {
                serde_json::from_str(json).unwrap_or_default()
            }
            _ => HashMap::new(),
        };
        map.insert(destination_id.to_string(), status);

        let json = serde_json::to_string(&map)?;
        conn.execute(
            "UPDATE photos SET upload_status = ?2, updated_at = ?3 WHERE id = ?1",
            params![photo_id, json, to_ts(chrono::Utc::now())],
        )?;
        Ok(())
    })
}

fn review_transition(
    db: &Database,
    id: &str,
    target: PhotoStatus,
    allowed_from: &[PhotoStatus],
) -> Result<(), DatabaseError> {
    let photo = find_by_id(db, id)?.ok_or_else(|| DatabaseError::NotFound {
        what: "photo",
        id: id.to_string(),
    })?;
    // Idempotent: re-applying the current status is a no-op.
    if photo.status == target {
        return Ok(());
    }
    if !allowed_from.contains(&photo.status) {
        return Err(DatabaseError::InvalidTransition {
            from: photo.status.as_str().to_string(),
            to: target.as_str().to_string(),
        });
    }
    update_status(db, id, target)
}

/// Marks a processed (or previously rejected) photo as approved for
/// upload. Approving an already-approved photo is a no-op.
pub fn approve(db: &Database, id: &str) -> Result<(), DatabaseError> {
    review_transition(
        db,
        id,
        PhotoStatus::Approved,
        &[PhotoStatus::Processed, PhotoStatus::Rejected],
    )
}

/// Marks a processed (or previously approved) photo as rejected.
/// Rejecting an already-rejected photo is a no-op.
pub fn reject(db: &Database, id: &str) -> Result<(), DatabaseError> {
    review_transition(
        db,
        id,
        PhotoStatus::Rejected,
        &[PhotoStatus::Processed, PhotoStatus::Approved],
    )
}

/// Returns an approved or rejected photo to the reviewable `processed`
/// state.
pub fn reset_to_processed(db: &Database, id: &str) -> Result<(), DatabaseError> {
    review_transition(
        db,
        id,
        PhotoStatus::Processed,
        &[PhotoStatus::Approved, PhotoStatus::Rejected],
    )
}

/// IDs of all approved photos in a batch, in creation order.
pub fn approved_ids(db: &Database, batch_id: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM photos WHERE batch_id = ?1 AND status = 'approved'
             ORDER BY created_at ASC",
        )?;
        let ids = stmt
            .query_map(params![batch_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Counts photos with the given status across all batches.
pub fn count_by_status(db: &Database, status: PhotoStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM photos WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
