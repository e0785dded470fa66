//! Pluggable face detection + encoding capability.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, FaceSignature};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// One face found in a photo, with its signature.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub signature: FaceSignature,
}

/// Detects faces in a photo and computes a comparable signature for each.
///
/// Implementations return faces in their native order (most confident first
/// for the ONNX backend) and encode at most `limit` of them.
pub trait FaceBackend {
    fn name(&self) -> &str;

    fn detect_and_encode(
        &mut self,
        image: &RgbImage,
        limit: usize,
    ) -> Result<Vec<DetectedFace>, BackendError>;
}

impl<B: FaceBackend + ?Sized> FaceBackend for &mut B {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn detect_and_encode(
        &mut self,
        image: &RgbImage,
        limit: usize,
    ) -> Result<Vec<DetectedFace>, BackendError> {
        (**self).detect_and_encode(image, limit)
    }
}

/// SCRFD detection followed by ArcFace embedding.
pub struct OnnxBackend {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxBackend {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path, confidence_threshold: f32) -> Result<Self, BackendError> {
        let detector = FaceDetector::load(&scrfd_model_path(model_dir), confidence_threshold)?;
        let recognizer = FaceRecognizer::load(&arcface_model_path(model_dir))?;
        Ok(Self { detector, recognizer })
    }
}

pub fn scrfd_model_path(model_dir: &Path) -> PathBuf {
    model_dir.join(SCRFD_MODEL_FILE)
}

pub fn arcface_model_path(model_dir: &Path) -> PathBuf {
    model_dir.join(ARCFACE_MODEL_FILE)
}

impl FaceBackend for OnnxBackend {
    fn name(&self) -> &str {
        "scrfd+arcface"
    }

    fn detect_and_encode(
        &mut self,
        image: &RgbImage,
        limit: usize,
    ) -> Result<Vec<DetectedFace>, BackendError> {
        let boxes = self.detector.detect(image)?;
        if boxes.len() > limit {
            tracing::warn!(detected = boxes.len(), limit, "face cap reached; keeping most confident");
        }

        let mut faces = Vec::with_capacity(boxes.len().min(limit));
        for bbox in boxes.into_iter().take(limit) {
            match self.recognizer.encode(image, &bbox) {
                Ok(signature) => faces.push(DetectedFace { bbox, signature }),
                Err(RecognizerError::NoLandmarks) => {
                    tracing::debug!(confidence = bbox.confidence, "skipping face without landmarks");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(faces)
    }
}
