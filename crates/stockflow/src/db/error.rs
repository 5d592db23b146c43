//! Database error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::UnknownValue;
use crate::retry::{Classify, ErrorKind};

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A JSON column failed to serialize or deserialize.
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    /// A status or classification column holds an unrecognized value.
    #[error(transparent)]
    Unknown(#[from] UnknownValue),

    /// A timestamp column is not valid RFC 3339.
    #[error("Invalid timestamp '{0}'")]
    Timestamp(String),

    /// The referenced row does not exist.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// The requested status change is not a legal transition.
    #[error("Invalid status transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },
}

impl Classify for DatabaseError {
    fn kind(&self) -> ErrorKind {
        match self {
            // SQLITE_BUSY / SQLITE_LOCKED are write conflicts worth retrying.
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => match e.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    ErrorKind::Transient
                }
                _ => ErrorKind::Permanent,
            },
            _ => ErrorKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{with_backoff, RetryPolicy};
    use rusqlite::ffi;

    fn sqlite_err(code: std::os::raw::c_int) -> DatabaseError {
        DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(code),
            Some("simulated".to_string()),
        ))
    }

    #[test]
    fn test_write_conflicts_are_transient() {
        assert_eq!(sqlite_err(ffi::SQLITE_BUSY).kind(), ErrorKind::Transient);
        assert_eq!(sqlite_err(ffi::SQLITE_LOCKED).kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_other_failures_are_permanent() {
        assert_eq!(
            sqlite_err(ffi::SQLITE_CONSTRAINT).kind(),
            ErrorKind::Permanent
        );
        let not_found = DatabaseError::NotFound {
            what: "photo",
            id: "p1".to_string(),
        };
        assert_eq!(not_found.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn test_busy_store_write_is_retried() {
        let mut calls = 0;
        let result: Result<(), DatabaseError> =
            with_backoff(&RetryPolicy::immediate(3), "status flush", || {
                calls += 1;
                if calls < 3 {
                    Err(sqlite_err(ffi::SQLITE_BUSY))
                } else {
                    Ok(())
                }
            });
        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_missing_row_surfaces_immediately() {
        let mut calls = 0;
        let result: Result<(), DatabaseError> =
            with_backoff(&RetryPolicy::immediate(3), "status flush", || {
                calls += 1;
                Err(DatabaseError::NotFound {
                    what: "photo",
                    id: "p1".to_string(),
                })
            });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
