//! Narrow interfaces to the roster and attendance storage.

use crate::types::{AttendanceSession, DecisionMap, EnrolledPerson, SessionId};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Supplies the people eligible for a class.
pub trait RosterProvider {
    fn people_in_class(&self, class_label: &str) -> Result<Vec<EnrolledPerson>, StoreError>;
}

/// Writes available inside one attendance transaction.
pub trait SessionWriter {
    /// Create the session row; must precede any record for it.
    fn create_session(&mut self, name: &str, class_label: &str)
        -> Result<AttendanceSession, StoreError>;

    /// One record per decision. Returns the number of rows written.
    fn bulk_create_records(
        &mut self,
        session_id: SessionId,
        decisions: &DecisionMap,
    ) -> Result<usize, StoreError>;

    fn set_report_path(&mut self, session_id: SessionId, path: &Path) -> Result<(), StoreError>;
}

/// Persistence sink for attendance runs.
pub trait AttendanceStore {
    /// Run `f` in one transaction: committed if `f` returns `Ok`, rolled back otherwise.
    fn in_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn SessionWriter) -> Result<T, E>,
        E: From<StoreError>;
}
