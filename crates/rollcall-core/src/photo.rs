//! Photo loading: decode JPEG/PNG input and normalize to 8-bit RGB.

use image::{ImageReader, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A photo handed to the engine, either on disk or already in memory.
#[derive(Debug, Clone)]
pub enum PhotoSource {
    Path(PathBuf),
    Bytes {
        /// Human-readable origin used in diagnostics (e.g. the upload's file name).
        label: String,
        data: Vec<u8>,
    },
}

impl PhotoSource {
    pub fn label(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes { label, .. } => label.clone(),
        }
    }

    /// Decode and normalize to RGB8.
    pub fn load(&self) -> Result<RgbImage, ImageLoadError> {
        match self {
            Self::Path(path) => load_rgb(path),
            Self::Bytes { label, data } => load_rgb_bytes(data, label),
        }
    }
}

impl From<PathBuf> for PhotoSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for PhotoSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

#[derive(Error, Debug)]
pub enum ImageLoadError {
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("cannot read image {origin}: {source}")]
    Io {
        origin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode image {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: image::ImageError,
    },
}

impl ImageLoadError {
    /// Path or label of the offending image.
    pub fn origin(&self) -> &str {
        match self {
            Self::NotFound(origin) => origin,
            Self::Io { origin, .. } | Self::Decode { origin, .. } => origin,
        }
    }
}

/// Load an image file and convert it to RGB8 regardless of its stored color model.
pub fn load_rgb(path: &Path) -> Result<RgbImage, ImageLoadError> {
    let origin = path.display().to_string();
    if !path.is_file() {
        return Err(ImageLoadError::NotFound(origin));
    }

    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|source| ImageLoadError::Io {
            origin: origin.clone(),
            source,
        })?;
    let decoded = reader
        .decode()
        .map_err(|source| ImageLoadError::Decode { origin, source })?;

    tracing::trace!(
        path = %path.display(),
        width = decoded.width(),
        height = decoded.height(),
        color = ?decoded.color(),
        "decoded image"
    );
    Ok(decoded.to_rgb8())
}

/// Decode an in-memory JPEG/PNG and convert it to RGB8.
pub fn load_rgb_bytes(data: &[u8], label: &str) -> Result<RgbImage, ImageLoadError> {
    image::load_from_memory(data)
        .map(|img| img.to_rgb8())
        .map_err(|source| ImageLoadError::Decode {
            origin: label.to_string(),
            source,
        })
}

/// True for file names with a supported photo extension (case-insensitive).
pub fn is_photo_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}
