//! Event log repository — append-only audit trail.
//!
//! Entries are never mutated; the only deletion path is the time-based
//! retention sweep.

use rusqlite::{params, Row};

use crate::model::{EventLog, EventOutcome, EventType};

use super::{parse_ts, to_ts, Database, DatabaseError};

fn from_row(row: &Row<'_>) -> Result<EventLog, DatabaseError> {
    let event_type: String = row.get("event_type")?;
    let outcome: String = row.get("outcome")?;
    let created_at: String = row.get("created_at")?;
    Ok(EventLog {
        id: row.get("id")?,
        batch_id: row.get("batch_id")?,
        photo_id: row.get("photo_id")?,
        event_type: EventType::parse(&event_type)?,
        outcome: EventOutcome::parse(&outcome)?,
        message: row.get("message")?,
        detail: row.get("detail")?,
        progress: row.get::<_, i64>("progress")?.clamp(0, 100) as u8,
        created_at: parse_ts(&created_at)?,
    })
}

/// Appends an event.
pub fn insert(db: &Database, event: &EventLog) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO event_logs (id, batch_id, photo_id, event_type, outcome, message,
             detail, progress, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id,
                event.batch_id,
                event.photo_id,
                event.event_type.as_str(),
                event.outcome.as_str(),
                event.message,
                event.detail,
                event.progress as i64,
                to_ts(event.created_at),
            ],
        )?;
        Ok(())
    })
}

/// Recent events for a batch, newest first. `limit` of 0 means no bound.
pub fn for_batch(db: &Database, batch_id: &str, limit: u32) -> Result<Vec<EventLog>, DatabaseError> {
    db.with_conn(|conn| {
        let limit = if limit == 0 { i64::MAX } else { limit as i64 };
        let mut stmt = conn.prepare(
            "SELECT * FROM event_logs WHERE batch_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![batch_id, limit])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(from_row(row)?);
        }
        Ok(events)
    })
}

/// Recent events for a photo, newest first.
pub fn for_photo(db: &Database, photo_id: &str, limit: u32) -> Result<Vec<EventLog>, DatabaseError> {
    db.with_conn(|conn| {
        let limit = if limit == 0 { i64::MAX } else { limit as i64 };
        let mut stmt = conn.prepare(
            "SELECT * FROM event_logs WHERE photo_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![photo_id, limit])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(from_row(row)?);
        }
        Ok(events)
    })
}

/// Retention sweep: deletes events older than the given number of days.
pub fn cleanup_older_than(db: &Database, days: u32) -> Result<usize, DatabaseError> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(days as i64);
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM event_logs WHERE created_at < ?1",
            params![to_ts(cutoff)],
        )?;
        Ok(deleted)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("test database")
    }

    fn sample_event(batch_id: &str, photo_id: Option<&str>, message: &str) -> EventLog {
        EventLog::new(
            batch_id,
            photo_id,
            EventType::Annotation,
            EventOutcome::Progress,
            message,
        )
    }

    #[test]
    fn test_insert_and_query_for_batch() {
        let db = test_db();
        insert(&db, &sample_event("b1", None, "first")).unwrap();
        insert(&db, &sample_event("b1", Some("p1"), "second")).unwrap();
        insert(&db, &sample_event("b2", None, "other batch")).unwrap();

        let events = for_batch(&db, "b1", 10).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_newest_first_with_limit() {
        let db = test_db();
        for i in 0..5 {
            let mut event = sample_event("b1", None, &format!("event {i}"));
            event.created_at = chrono::Utc::now() + chrono::Duration::seconds(i);
            insert(&db, &event).unwrap();
        }

        let events = for_batch(&db, "b1", 2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "event 4");
        assert_eq!(events[1].message, "event 3");
    }

    #[test]
    fn test_for_photo() {
        let db = test_db();
        insert(&db, &sample_event("b1", Some("p1"), "photo event")).unwrap();
        insert(&db, &sample_event("b1", None, "batch event")).unwrap();

        let events = for_photo(&db, "p1", 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "photo event");
    }

    #[test]
    fn test_detail_and_progress_roundtrip() {
        let db = test_db();
        let event = sample_event("b1", Some("p1"), "annotating")
            .with_detail("attempt 2")
            .with_progress(30);
        insert(&db, &event).unwrap();

        let events = for_photo(&db, "p1", 1).unwrap();
        assert_eq!(events[0].detail.as_deref(), Some("attempt 2"));
        assert_eq!(events[0].progress, 30);
    }

    #[test]
    fn test_cleanup_older_than() {
        let db = test_db();
        let mut old = sample_event("b1", None, "ancient");
        old.created_at = chrono::Utc::now() - chrono::Duration::days(90);
        insert(&db, &old).unwrap();
        insert(&db, &sample_event("b1", None, "fresh")).unwrap();

        let deleted = cleanup_older_than(&db, 30).unwrap();
        assert_eq!(deleted, 1);
        let events = for_batch(&db, "b1", 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "fresh");
    }
}
