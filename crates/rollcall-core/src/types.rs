use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Opaque identity of an enrolled person (row id in the roster store).
pub type PersonId = i64;

/// Identity of an attendance session.
pub type SessionId = i64;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Comparable representation of one detected face (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSignature {
    pub values: Vec<f32>,
}

impl FaceSignature {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Cosine similarity in [-1, 1]. Zero vectors compare as 0.
    pub fn similarity(&self, other: &FaceSignature) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    pub fn euclidean_distance(&self, other: &FaceSignature) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Distance under `metric`; smaller means more alike.
    pub fn distance(&self, other: &FaceSignature, metric: DistanceMetric) -> f32 {
        match metric {
            DistanceMetric::Euclidean => self.euclidean_distance(other),
            DistanceMetric::Cosine => 1.0 - self.similarity(other),
        }
    }
}

/// How two signatures are compared against the tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// L2 distance. On L2-normalized signatures this lies in [0, 2].
    #[default]
    Euclidean,
    /// `1 - cosine similarity`, in [0, 2].
    Cosine,
}

impl FromStr for DistanceMetric {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "cosine" => Ok(Self::Cosine),
            _ => Err(ParseOptionError::new("distance metric", s)),
        }
    }
}

/// What to do when a reference image contains more than one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceFacePolicy {
    /// Keep the first face in detector order (highest confidence).
    #[default]
    First,
    /// Discard the whole image.
    Reject,
    /// Keep every face.
    All,
}

impl FromStr for ReferenceFacePolicy {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "reject" => Ok(Self::Reject),
            "all" => Ok(Self::All),
            _ => Err(ParseOptionError::new("reference face policy", s)),
        }
    }
}

/// How enrolled signatures are matched against faces in the group photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Present if any (enrolled, group) pair is within tolerance.
    #[default]
    Any,
    /// Each group face only credits the roster signature nearest to it.
    Nearest,
}

impl FromStr for MatchPolicy {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "nearest" | "best" => Ok(Self::Nearest),
            _ => Err(ParseOptionError::new("match policy", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value:?}")]
pub struct ParseOptionError {
    what: &'static str,
    value: String,
}

impl ParseOptionError {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

/// Where a person's reference photos come from.
#[derive(Debug, Clone, Default)]
pub enum ReferenceImages {
    #[default]
    None,
    /// A folder of `.jpg` / `.jpeg` / `.png` files.
    Directory(PathBuf),
    Files(Vec<PathBuf>),
    /// Encoded images held in memory.
    Blobs(Vec<Vec<u8>>),
}

/// A person on the roster.
#[derive(Debug, Clone)]
pub struct EnrolledPerson {
    pub id: PersonId,
    pub name: String,
    pub roll_no: String,
    /// Decides which sessions the person is eligible for.
    pub class_label: String,
    pub images: ReferenceImages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Present" => Ok(Self::Present),
            "Absent" => Ok(Self::Absent),
            _ => Err(ParseOptionError::new("attendance status", s)),
        }
    }
}

/// Decision for every roster person, ordered by person id.
pub type DecisionMap = BTreeMap<PersonId, AttendanceStatus>;

/// One attendance-taking event for a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceSession {
    pub id: SessionId,
    pub name: String,
    pub class_label: String,
    pub created_at: DateTime<Utc>,
    pub report_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: SessionId,
    pub person_id: PersonId,
    pub status: AttendanceStatus,
}
