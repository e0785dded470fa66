//! One attendance run: roster → reconcile → session + records + report.

use crate::backend::{BackendError, FaceBackend};
use crate::matcher::{ReconcileError, Reconciler, Reconciliation};
use crate::photo::{ImageLoadError, PhotoSource};
use crate::report::{self, ReportError};
use crate::store::{AttendanceStore, RosterProvider, StoreError};
use crate::types::{AttendanceSession, SessionId};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("session label and class label must both be non-empty")]
    InvalidRequest,
    #[error("roster lookup failed: {0}")]
    Roster(#[source] StoreError),
    #[error("group photo unusable: {0}")]
    ImageLoad(#[from] ImageLoadError),
    #[error("face backend failed on group photo: {0}")]
    Backend(#[from] BackendError),
    /// Nothing from the run was committed. `session_id` is the id the store
    /// had allocated, if any, so operators can reconcile it.
    #[error("persisting attendance failed (session {session_id:?}): {source}")]
    Persistence {
        session_id: Option<SessionId>,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Report(#[from] ReportError),
}

impl From<ReconcileError> for AttendanceError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::ImageLoad(e) => Self::ImageLoad(e),
            ReconcileError::Backend(e) => Self::Backend(e),
        }
    }
}

impl From<StoreError> for AttendanceError {
    fn from(source: StoreError) -> Self {
        Self::Persistence {
            session_id: None,
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceRequest {
    pub session_name: String,
    pub class_label: String,
    pub photo: PhotoSource,
}

#[derive(Debug, Clone)]
pub struct AttendanceOutcome {
    pub session: AttendanceSession,
    pub reconciliation: Reconciliation,
    pub report_path: PathBuf,
    pub records_written: usize,
}

/// Runs attendance passes and files their reports under `report_dir`.
pub struct AttendanceTaker<B> {
    reconciler: Reconciler<B>,
    report_dir: PathBuf,
}

impl<B: FaceBackend> AttendanceTaker<B> {
    pub fn new(reconciler: Reconciler<B>, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            reconciler,
            report_dir: report_dir.into(),
        }
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    pub fn into_reconciler(self) -> Reconciler<B> {
        self.reconciler
    }

    /// Take attendance for one class from one group photo.
    ///
    /// Nothing is written unless the photo was processed. The session, its
    /// records and the report path are committed together; on failure the
    /// transaction is rolled back and a report already written is removed.
    pub fn take<S>(
        &mut self,
        store: &mut S,
        request: &AttendanceRequest,
    ) -> Result<AttendanceOutcome, AttendanceError>
    where
        S: RosterProvider + AttendanceStore,
    {
        let session_name = request.session_name.trim();
        let class_label = request.class_label.trim();
        if session_name.is_empty() || class_label.is_empty() {
            return Err(AttendanceError::InvalidRequest);
        }

        let roster = store
            .people_in_class(class_label)
            .map_err(AttendanceError::Roster)?;
        tracing::info!(class = class_label, people = roster.len(), "roster loaded");

        let reconciliation = self.reconciler.reconcile(&request.photo, &roster)?;

        let report_dir = &self.report_dir;
        let mut written_report: Option<PathBuf> = None;
        let mut allocated: Option<SessionId> = None;
        let result = store.in_transaction(|writer| -> Result<_, AttendanceError> {
            let session = writer.create_session(session_name, class_label)?;
            allocated = Some(session.id);
            let persistence = |source| AttendanceError::Persistence {
                session_id: Some(session.id),
                source,
            };

            let records_written = writer
                .bulk_create_records(session.id, &reconciliation.decisions)
                .map_err(persistence)?;

            let report_path = report_dir.join(report::report_file_name(&session));
            report::write_report(&report_path, &roster, &reconciliation.decisions)?;
            written_report = Some(report_path.clone());

            writer
                .set_report_path(session.id, &report_path)
                .map_err(persistence)?;

            Ok((session, report_path, records_written))
        });

        let (mut session, report_path, records_written) = match result {
            Ok(done) => done,
            Err(e) => {
                if let Some(path) = written_report {
                    if let Err(rm) = std::fs::remove_file(&path) {
                        tracing::warn!(path = %path.display(), error = %rm, "could not remove report of failed run");
                    }
                }
                let e = match e {
                    // Commit failures surface from the store without the id.
                    AttendanceError::Persistence {
                        session_id: None,
                        source,
                    } => AttendanceError::Persistence {
                        session_id: allocated,
                        source,
                    },
                    other => other,
                };
                tracing::error!(error = %e, "attendance run rolled back");
                return Err(e);
            }
        };
        session.report_path = Some(report_path.clone());

        tracing::info!(
            session = session.id,
            records = records_written,
            report = %report_path.display(),
            "attendance recorded"
        );

        Ok(AttendanceOutcome {
            session,
            reconciliation,
            report_path,
            records_written,
        })
    }
}
