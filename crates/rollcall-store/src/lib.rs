//! rollcall-store: SQLite roster, sessions and attendance records.
//!
//! Implements the `RosterProvider` and `AttendanceStore` interfaces from
//! `rollcall-core`, plus the admin queries the CLI needs.

mod migrations;
mod roster;
mod sessions;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rollcall_core::StoreError;
use std::path::Path;
use thiserror::Error;

pub use migrations::MigrationError;
pub use roster::{NewPerson, PersonUpdate};
pub use sessions::{PersonHistoryEntry, SessionRecordRow, SessionSummary};

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot open database: {0}")]
    Open(#[from] rusqlite::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// SQLite-backed store. One connection; writers serialize on its transactions.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| OpenError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            tracing::warn!(error = %e, "could not enable WAL mode");
        }
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(store)
    }

    /// Fresh private in-memory database.
    pub fn open_in_memory() -> Result<Self, OpenError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, OpenError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self { conn })
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp {value:?}: {e}")))
}
