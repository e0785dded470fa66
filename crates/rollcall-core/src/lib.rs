//! rollcall-core: attendance from a group photo.
//!
//! Extracts face signatures for each enrolled person, matches them against
//! the faces found in one group photo, and records a Present/Absent decision
//! for everyone on the roster. The shipped face backend runs SCRFD detection
//! and ArcFace embeddings through ONNX Runtime.

pub mod alignment;
pub mod attendance;
pub mod backend;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod photo;
pub mod recognizer;
pub mod report;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use attendance::{AttendanceError, AttendanceOutcome, AttendanceRequest, AttendanceTaker};
pub use backend::{BackendError, DetectedFace, FaceBackend, OnnxBackend};
pub use extractor::{ExtractorConfig, SignatureExtractor};
pub use matcher::{MatchConfig, ReconcileError, Reconciler, Reconciliation};
pub use photo::{ImageLoadError, PhotoSource};
pub use store::{AttendanceStore, RosterProvider, SessionWriter, StoreError};
pub use types::{
    AttendanceRecord, AttendanceSession, AttendanceStatus, DecisionMap, DistanceMetric,
    EnrolledPerson, FaceSignature, MatchPolicy, PersonId, ReferenceFacePolicy, ReferenceImages,
    SessionId,
};
