//! Destination repository — upload destination configs.

use rusqlite::{params, Row};

use crate::model::{Classification, Destination, DestinationKind};

use super::{parse_ts, to_ts, Database, DatabaseError};

fn from_row(row: &Row<'_>) -> Result<Destination, DatabaseError> {
    let kind: String = row.get("kind")?;
    let supported: String = row.get("supported")?;
    let connection: String = row.get("connection")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Destination {
        id: row.get("id")?,
        name: row.get("name")?,
        kind: DestinationKind::parse(&kind)?,
        supported: serde_json::from_str(&supported)?,
        connection: serde_json::from_str(&connection)?,
        active: row.get::<_, i64>("active")? != 0,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Inserts or replaces a destination config.
pub fn upsert(db: &Database, dest: &Destination) -> Result<(), DatabaseError> {
    let supported = serde_json::to_string(&dest.supported)?;
    let connection = serde_json::to_string(&dest.connection)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR REPLACE INTO destinations
             (id, name, kind, supported, connection, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                dest.id,
                dest.name,
                dest.kind.as_str(),
                supported,
                connection,
                dest.active as i64,
                to_ts(dest.created_at),
                to_ts(dest.updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Finds a destination by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Destination>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM destinations WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// All destinations, oldest first.
pub fn all(db: &Database) -> Result<Vec<Destination>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM destinations ORDER BY created_at ASC")?;
        let mut rows = stmt.query([])?;
        let mut dests = Vec::new();
        while let Some(row) = rows.next()? {
            dests.push(from_row(row)?);
        }
        Ok(dests)
    })
}

/// Active destinations that accept the given classification, in a
/// stable order (creation time). Upload jobs attempt destinations in
/// exactly this order.
pub fn active_for(
    db: &Database,
    classification: Classification,
) -> Result<Vec<Destination>, DatabaseError> {
    let mut dests = db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM destinations WHERE active = 1 ORDER BY created_at ASC")?;
        let mut rows = stmt.query([])?;
        let mut dests = Vec::new();
        while let Some(row) = rows.next()? {
            dests.push(from_row(row)?);
        }
        Ok(dests)
    })?;
    // `supported` is a JSON column; filter after decoding.
    dests.retain(|d| d.supports(classification));
    Ok(dests)
}

/// Enables or disables a destination.
pub fn set_active(db: &Database, id: &str, active: bool) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE destinations SET active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, active as i64, to_ts(chrono::Utc::now())],
        )?;
        Ok(())
    })
}

/// Removes a destination config. Administrative; the schedulers never
/// call this.
pub fn delete(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM destinations WHERE id = ?1", params![id])?;
        Ok(())
    })
}
