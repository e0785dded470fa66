//! Deterministic stand-ins for the face backend and the store, for tests.
//!
//! Every non-black pixel in the top row of a photo is one "face"; its
//! signature is the pixel's RGB scaled to [0, 1]. Two photos therefore share
//! a face exactly when they share a top-row color.

use crate::backend::{BackendError, DetectedFace, FaceBackend};
use crate::store::{AttendanceStore, RosterProvider, SessionWriter, StoreError};
use crate::types::{
    AttendanceRecord, AttendanceSession, BoundingBox, DecisionMap, EnrolledPerson, FaceSignature,
    SessionId,
};
use chrono::Utc;
use image::{Rgb, RgbImage};
use std::path::Path;

#[derive(Debug, Default)]
pub struct PixelBackend {
    /// Number of `detect_and_encode` calls served.
    pub calls: usize,
}

impl FaceBackend for PixelBackend {
    fn name(&self) -> &str {
        "pixel"
    }

    fn detect_and_encode(
        &mut self,
        image: &RgbImage,
        limit: usize,
    ) -> Result<Vec<DetectedFace>, BackendError> {
        self.calls += 1;
        if image.height() == 0 {
            return Ok(Vec::new());
        }
        Ok((0..image.width())
            .filter_map(|x| {
                let p = image.get_pixel(x, 0).0;
                (p != [0, 0, 0]).then(|| DetectedFace {
                    bbox: BoundingBox {
                        x: x as f32,
                        y: 0.0,
                        width: 1.0,
                        height: 1.0,
                        confidence: 1.0,
                        landmarks: None,
                    },
                    signature: FaceSignature::new(p.iter().map(|&c| c as f32 / 255.0).collect()),
                })
            })
            .take(limit)
            .collect())
    }
}

/// [`PixelBackend`] that errors on chosen calls, counted from 1.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    pub inner: PixelBackend,
    pub fail_on: Vec<usize>,
}

impl FlakyBackend {
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            inner: PixelBackend::default(),
            fail_on: calls.to_vec(),
        }
    }
}

impl FaceBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky-pixel"
    }

    fn detect_and_encode(
        &mut self,
        image: &RgbImage,
        limit: usize,
    ) -> Result<Vec<DetectedFace>, BackendError> {
        let call = self.inner.calls + 1;
        if self.fail_on.contains(&call) {
            self.inner.calls = call;
            return Err(BackendError::Other(format!("injected failure on call {call}")));
        }
        self.inner.detect_and_encode(image, limit)
    }
}

/// Photo whose top row holds one pixel per face color (black row when empty).
pub fn faces_photo(faces: &[[u8; 3]]) -> RgbImage {
    let width = faces.len().max(1) as u32;
    let mut image = RgbImage::new(width, 2);
    for (x, color) in faces.iter().enumerate() {
        image.put_pixel(x as u32, 0, Rgb(*color));
    }
    image
}

/// Write [`faces_photo`] as a PNG.
pub fn write_faces_photo(path: &Path, faces: &[[u8; 3]]) {
    faces_photo(faces)
        .save(path)
        .unwrap_or_else(|e| panic!("write {}: {e}", path.display()));
}

/// In-memory roster + attendance store with all-or-nothing transactions.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    pub people: Vec<EnrolledPerson>,
    pub sessions: Vec<AttendanceSession>,
    pub records: Vec<AttendanceRecord>,
    /// Make `set_report_path` fail, to exercise rollback.
    pub fail_set_report_path: bool,
    /// Make the commit itself fail after every write succeeded.
    pub fail_commit: bool,
    next_session_id: SessionId,
}

impl MemoryStore {
    pub fn with_people(people: Vec<EnrolledPerson>) -> Self {
        Self {
            people,
            ..Self::default()
        }
    }
}

impl RosterProvider for MemoryStore {
    fn people_in_class(&self, class_label: &str) -> Result<Vec<EnrolledPerson>, StoreError> {
        Ok(self
            .people
            .iter()
            .filter(|p| p.class_label == class_label)
            .cloned()
            .collect())
    }
}

impl SessionWriter for MemoryStore {
    fn create_session(
        &mut self,
        name: &str,
        class_label: &str,
    ) -> Result<AttendanceSession, StoreError> {
        self.next_session_id += 1;
        let session = AttendanceSession {
            id: self.next_session_id,
            name: name.to_string(),
            class_label: class_label.to_string(),
            created_at: Utc::now(),
            report_path: None,
        };
        self.sessions.push(session.clone());
        Ok(session)
    }

    fn bulk_create_records(
        &mut self,
        session_id: SessionId,
        decisions: &DecisionMap,
    ) -> Result<usize, StoreError> {
        self.records.extend(decisions.iter().map(|(&person_id, &status)| AttendanceRecord {
            session_id,
            person_id,
            status,
        }));
        Ok(decisions.len())
    }

    fn set_report_path(&mut self, session_id: SessionId, path: &Path) -> Result<(), StoreError> {
        if self.fail_set_report_path {
            return Err(StoreError::Backend("injected failure".into()));
        }
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(StoreError::SessionNotFound(session_id))?;
        session.report_path = Some(path.to_path_buf());
        Ok(())
    }
}

impl AttendanceStore for MemoryStore {
    fn in_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn SessionWriter) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut staged = self.clone();
        let out = f(&mut staged)?;
        if self.fail_commit {
            return Err(StoreError::Backend("injected commit failure".into()).into());
        }
        *self = staged;
        Ok(out)
    }
}
