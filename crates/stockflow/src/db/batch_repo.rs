//! Batch repository — CRUD and queue queries for the `batches` table.

use rusqlite::{params, Row};

use crate::model::{Batch, BatchStatus, Classification};

use super::{parse_ts, to_ts, Database, DatabaseError};

fn from_row(row: &Row<'_>) -> Result<Batch, DatabaseError> {
    let classification: String = row.get("classification")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let folder_path: String = row.get("folder_path")?;
    Ok(Batch {
        id: row.get("id")?,
        classification: Classification::parse(&classification)?,
        description: row.get("description")?,
        folder_path: folder_path.into(),
        status: BatchStatus::parse(&status)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Inserts a new batch row.
pub fn insert(db: &Database, batch: &Batch) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO batches (id, classification, description, folder_path, status,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                batch.id,
                batch.classification.as_str(),
                batch.description,
                batch.folder_path.to_string_lossy(),
                batch.status.as_str(),
                to_ts(batch.created_at),
                to_ts(batch.updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Finds a batch by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Batch>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM batches WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// Returns the oldest `queued` batch, if any. FIFO by creation time.
pub fn next_queued(db: &Database) -> Result<Option<Batch>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM batches WHERE status = 'queued' ORDER BY created_at ASC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// Advances a batch's status. Automatic transitions are monotonic:
/// moving to a lower-ranked status is rejected (use [`requeue`] for the
/// explicit resume path).
pub fn advance_status(db: &Database, id: &str, status: BatchStatus) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let current: String = conn
            .query_row("SELECT status FROM batches WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                    what: "batch",
                    id: id.to_string(),
                },
                other => DatabaseError::Sqlite(other),
            })?;
        let current = BatchStatus::parse(&current)?;
        if status.rank() < current.rank() {
            return Err(DatabaseError::InvalidTransition {
                from: current.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        conn.execute(
            "UPDATE batches SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), to_ts(chrono::Utc::now())],
        )?;
        Ok(())
    })
}

/// Explicitly puts a batch back on the queue, e.g. to resume after an
/// interruption. The only sanctioned status regression.
pub fn requeue(db: &Database, id: &str) -> Result<(), DatabaseError> {
    let updated = db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE batches SET status = 'queued', updated_at = ?2 WHERE id = ?1",
            params![id, to_ts(chrono::Utc::now())],
        )?;
        Ok(n)
    })?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            what: "batch",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Recent batches, newest first.
pub fn recent(db: &Database, limit: u32) -> Result<Vec<Batch>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM batches ORDER BY created_at DESC LIMIT ?1")?;
        let mut rows = stmt.query(params![limit])?;
        let mut batches = Vec::new();
        while let Some(row) = rows.next()? {
            batches.push(from_row(row)?);
        }
        Ok(batches)
    })
}

/// Per-batch photo counters used by review and status surfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchStats {
    pub total: u32,
    pub processed: u32,
    pub approved: u32,
    pub rejected: u32,
    pub failed: u32,
}

/// Counts photos of a batch by review-relevant status.
pub fn photo_stats(db: &Database, batch_id: &str) -> Result<BatchStats, DatabaseError> {
    db.with_conn(|conn| {
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(CASE WHEN status = 'processed' THEN 1 END),
                    COUNT(CASE WHEN status = 'approved' THEN 1 END),
                    COUNT(CASE WHEN status = 'rejected' THEN 1 END),
                    COUNT(CASE WHEN status = 'failed' THEN 1 END)
             FROM photos WHERE batch_id = ?1",
            params![batch_id],
            |r| {
                Ok(BatchStats {
                    total: r.get(0)?,
                    processed: r.get(1)?,
                    approved: r.get(2)?,
                    rejected: r.get(3)?,
                    failed: r.get(4)?,
                })
            },
        )?;
        Ok(stats)
    })
}
