use crate::{backend, parse_datetime, SqliteStore};
use chrono::Utc;
use rollcall_core::{
    AttendanceSession, AttendanceStatus, AttendanceStore, DecisionMap, PersonId, SessionId,
    SessionWriter, StoreError,
};
use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A session with its record tallies.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session: AttendanceSession,
    pub present: usize,
    pub absent: usize,
}

impl SessionSummary {
    /// A session with no records was interrupted between its writes.
    pub fn is_orphaned(&self) -> bool {
        self.present + self.absent == 0
    }
}

/// One roster line of a stored session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecordRow {
    pub person_id: PersonId,
    pub name: String,
    pub roll_no: String,
    pub status: AttendanceStatus,
}

/// One session a person took part in.
#[derive(Debug, Clone, Serialize)]
pub struct PersonHistoryEntry {
    pub session: AttendanceSession,
    pub status: AttendanceStatus,
}

const SESSION_COLUMNS: &str = "s.id, s.name, s.class_label, s.created_at, s.report_path";

struct RawSession {
    id: SessionId,
    name: String,
    class_label: String,
    created_at: String,
    report_path: Option<String>,
}

impl RawSession {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            class_label: row.get(2)?,
            created_at: row.get(3)?,
            report_path: row.get(4)?,
        })
    }

    fn into_session(self) -> Result<AttendanceSession, StoreError> {
        Ok(AttendanceSession {
            id: self.id,
            name: self.name,
            class_label: self.class_label,
            created_at: parse_datetime(&self.created_at)?,
            report_path: self.report_path.map(PathBuf::from),
        })
    }
}

fn parse_status(value: &str) -> Result<AttendanceStatus, StoreError> {
    value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("attendance status: {e}")))
}

/// [`SessionWriter`] bound to one open SQLite transaction.
struct TxWriter<'t, 'c> {
    tx: &'t Transaction<'c>,
}

impl SessionWriter for TxWriter<'_, '_> {
    fn create_session(
        &mut self,
        name: &str,
        class_label: &str,
    ) -> Result<AttendanceSession, StoreError> {
        let created_at = Utc::now();
        self.tx
            .execute(
                "INSERT INTO attendance_sessions (name, class_label, created_at)
                 VALUES (?1, ?2, ?3)",
                params![name, class_label, created_at.to_rfc3339()],
            )
            .map_err(backend)?;
        let id = self.tx.last_insert_rowid();
        tracing::debug!(session = id, name, class = class_label, "session created");
        Ok(AttendanceSession {
            id,
            name: name.to_string(),
            class_label: class_label.to_string(),
            created_at,
            report_path: None,
        })
    }

    fn bulk_create_records(
        &mut self,
        session_id: SessionId,
        decisions: &DecisionMap,
    ) -> Result<usize, StoreError> {
        let mut stmt = self
            .tx
            .prepare_cached(
                "INSERT INTO attendance_records (session_id, person_id, status)
                 VALUES (?1, ?2, ?3)",
            )
            .map_err(backend)?;
        for (person_id, status) in decisions {
            stmt.execute(params![session_id, person_id, status.as_str()])
                .map_err(backend)?;
        }
        tracing::debug!(session = session_id, records = decisions.len(), "records created");
        Ok(decisions.len())
    }

    fn set_report_path(&mut self, session_id: SessionId, path: &Path) -> Result<(), StoreError> {
        let updated = self
            .tx
            .execute(
                "UPDATE attendance_sessions SET report_path = ?1 WHERE id = ?2",
                params![path.to_string_lossy(), session_id],
            )
            .map_err(backend)?;
        if updated == 0 {
            return Err(StoreError::SessionNotFound(session_id));
        }
        Ok(())
    }
}

impl AttendanceStore for SqliteStore {
    fn in_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn SessionWriter) -> Result<T, E>,
        E: From<StoreError>,
    {
        let tx = self.conn.transaction().map_err(|e| E::from(backend(e)))?;
        // Dropping `tx` on the error path rolls it back.
        let out = f(&mut TxWriter { tx: &tx })?;
        tx.commit().map_err(|e| E::from(backend(e)))?;
        Ok(out)
    }
}

impl SqliteStore {
    pub fn get_session(&self, id: SessionId) -> Result<AttendanceSession, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM attendance_sessions s WHERE s.id = ?1"),
                params![id],
                RawSession::from_row,
            )
            .optional()
            .map_err(backend)?
            .ok_or(StoreError::SessionNotFound(id))?
            .into_session()
    }

    /// All sessions, newest first, with present/absent tallies.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SESSION_COLUMNS},
                        COALESCE(SUM(r.status = 'Present'), 0),
                        COALESCE(SUM(r.status = 'Absent'), 0)
                 FROM attendance_sessions s
                 LEFT JOIN attendance_records r ON r.session_id = s.id
                 GROUP BY s.id
                 ORDER BY s.created_at DESC, s.id DESC"
            ))
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((RawSession::from_row(row)?, row.get::<_, i64>(5)?, row.get::<_, i64>(6)?))
            })
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;

        rows.into_iter()
            .map(|(raw, present, absent)| {
                Ok(SessionSummary {
                    session: raw.into_session()?,
                    present: present as usize,
                    absent: absent as usize,
                })
            })
            .collect()
    }

    /// Sessions that have no records at all.
    pub fn orphaned_sessions(&self) -> Result<Vec<AttendanceSession>, StoreError> {
        Ok(self
            .list_sessions()?
            .into_iter()
            .filter(SessionSummary::is_orphaned)
            .map(|s| s.session)
            .collect())
    }

    /// Records of one session joined with the roster, ordered by person id.
    pub fn records_for_session(&self, id: SessionId) -> Result<Vec<SessionRecordRow>, StoreError> {
        // Distinguish "unknown session" from "session with no records".
        self.get_session(id)?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.id, p.name, p.roll_no, r.status
                 FROM attendance_records r
                 JOIN people p ON p.id = r.person_id
                 WHERE r.session_id = ?1
                 ORDER BY p.id",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok((
                    row.get::<_, PersonId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;

        rows.into_iter()
            .map(|(person_id, name, roll_no, status)| {
                Ok(SessionRecordRow {
                    person_id,
                    name,
                    roll_no,
                    status: parse_status(&status)?,
                })
            })
            .collect()
    }

    /// A person's attendance across sessions, newest first.
    ///
    /// Only sessions the person was on the roster for carry a record, so
    /// class sessions held before they enrolled (or joined the class) are
    /// not listed and do not count against them.
    pub fn records_for_person(&self, id: PersonId) -> Result<Vec<PersonHistoryEntry>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SESSION_COLUMNS}, r.status
                 FROM attendance_records r
                 JOIN attendance_sessions s ON s.id = r.session_id
                 WHERE r.person_id = ?1
                 ORDER BY s.created_at DESC, s.id DESC"
            ))
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok((RawSession::from_row(row)?, row.get::<_, String>(5)?))
            })
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;

        rows.into_iter()
            .map(|(raw, status)| {
                Ok(PersonHistoryEntry {
                    session: raw.into_session()?,
                    status: parse_status(&status)?,
                })
            })
            .collect()
    }
}
