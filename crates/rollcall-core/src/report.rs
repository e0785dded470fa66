//! CSV attendance report.

use crate::types::{AttendanceSession, DecisionMap, EnrolledPerson, PersonId};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("cannot create report directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

pub const REPORT_HEADER: [&str; 4] = ["student_id", "student_name", "roll_no", "status"];

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    student_id: PersonId,
    student_name: &'a str,
    roll_no: &'a str,
    status: &'static str,
}

/// `{date}_{session}_{class}_{id}.csv`; the session id keeps reruns from colliding.
pub fn report_file_name(session: &AttendanceSession) -> String {
    format!(
        "{}_{}_{}_{}.csv",
        session.created_at.format("%Y-%m-%d"),
        sanitize(&session.name),
        sanitize(&session.class_label),
        session.id
    )
}

/// Keep `[A-Za-z0-9_-]`, replace everything else with `_`.
fn sanitize(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Write one row per decision (ordered by person id) and return the row count.
pub fn write_report(
    path: &Path,
    roster: &[EnrolledPerson],
    decisions: &DecisionMap,
) -> Result<usize, ReportError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ReportError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let by_id: HashMap<PersonId, &EnrolledPerson> = roster.iter().map(|p| (p.id, p)).collect();
    let write_err = |source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    };

    // Header is written up front so an empty roster still yields a valid report.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(write_err)?;
    writer.write_record(REPORT_HEADER).map_err(write_err)?;
    for (&id, status) in decisions {
        let person = by_id.get(&id);
        writer
            .serialize(ReportRow {
                student_id: id,
                student_name: person.map_or("", |p| p.name.as_str()),
                roll_no: person.map_or("", |p| p.roll_no.as_str()),
                status: status.as_str(),
            })
            .map_err(write_err)?;
    }
    writer
        .flush()
        .map_err(|e| write_err(csv::Error::from(e)))?;

    tracing::info!(path = %path.display(), rows = decisions.len(), "attendance report written");
    Ok(decisions.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttendanceStatus, ReferenceImages};
    use chrono::{TimeZone, Utc};

    fn session(name: &str, class: &str, id: i64) -> AttendanceSession {
        AttendanceSession {
            id,
            name: name.into(),
            class_label: class.into(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 9, 14, 30, 0).unwrap(),
            report_path: None,
        }
    }

    fn person(id: PersonId, name: &str, roll: &str) -> EnrolledPerson {
        EnrolledPerson {
            id,
            name: name.into(),
            roll_no: roll.into(),
            class_label: "CS101".into(),
            images: ReferenceImages::None,
        }
    }

    #[test]
    fn test_file_name_sanitized_and_unique_per_session() {
        let a = report_file_name(&session("Python Lecture 1", "CS/101", 7));
        assert_eq!(a, "2026-03-09_Python_Lecture_1_CS_101_7.csv");
        let b = report_file_name(&session("Python Lecture 1", "CS/101", 8));
        assert_ne!(a, b);
        assert_eq!(report_file_name(&session("  ", "x", 1)), "2026-03-09_unnamed_x_1.csv");
    }

    #[test]
    fn test_write_report_rows_sorted_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/report.csv");
        let roster = vec![person(2, "Bob", "R2"), person(1, "Alice, Jr.", "R1")];
        let decisions: DecisionMap = [(2, AttendanceStatus::Absent), (1, AttendanceStatus::Present)]
            .into_iter()
            .collect();

        let rows = write_report(&path, &roster, &decisions).unwrap();
        assert_eq!(rows, 2);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "student_id,student_name,roll_no,status\n1,\"Alice, Jr.\",R1,Present\n2,Bob,R2,Absent\n"
        );
    }

    #[test]
    fn test_empty_report_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        assert_eq!(write_report(&path, &[], &DecisionMap::new()).unwrap(), 0);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "student_id,student_name,roll_no,status\n"
        );
    }
}
