//! Reference signature extraction for enrolled people.

use crate::backend::{BackendError, FaceBackend};
use crate::photo::{self, ImageLoadError};
use crate::types::{EnrolledPerson, FaceSignature, ReferenceFacePolicy, ReferenceImages};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MAX_FACES_PER_IMAGE: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct ExtractorConfig {
    pub reference_faces: ReferenceFacePolicy,
    /// Upper bound on faces encoded from any single photo.
    pub max_faces_per_image: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            reference_faces: ReferenceFacePolicy::First,
            max_faces_per_image: DEFAULT_MAX_FACES_PER_IMAGE,
        }
    }
}

/// Why a single reference image contributed nothing. Never fatal.
#[derive(Error, Debug)]
pub enum PersonImageError {
    #[error(transparent)]
    Load(#[from] ImageLoadError),
    #[error("cannot list reference directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("backend failed on {origin}: {source}")]
    Backend {
        origin: String,
        #[source]
        source: BackendError,
    },
    #[error("{origin} holds {faces} faces and multi-face references are rejected")]
    MultipleFaces { origin: String, faces: usize },
}

/// Signatures from one person's reference images, plus what had to be skipped.
#[derive(Debug, Default)]
pub struct Extraction {
    pub signatures: Vec<FaceSignature>,
    pub skipped: Vec<PersonImageError>,
    /// Images that decoded successfully.
    pub images_read: usize,
}

/// Turns reference photos into face signatures using a [`FaceBackend`].
pub struct SignatureExtractor<B> {
    backend: B,
    config: ExtractorConfig,
}

impl<B: FaceBackend> SignatureExtractor<B> {
    pub fn new(backend: B, config: ExtractorConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Extract a person's reference signatures, logging anything skipped.
    pub fn extract_person(&mut self, person: &EnrolledPerson) -> Extraction {
        let extraction = self.extract(&person.images);
        for skipped in &extraction.skipped {
            tracing::warn!(person = person.id, error = %skipped, "reference image skipped");
        }
        if extraction.signatures.is_empty() {
            tracing::warn!(
                person = person.id,
                name = %person.name,
                images = extraction.images_read,
                "no usable reference face; person will be marked absent"
            );
        } else {
            tracing::debug!(
                person = person.id,
                signatures = extraction.signatures.len(),
                "reference signatures extracted"
            );
        }
        extraction
    }

    /// Extract signatures from every image in `images`.
    pub fn extract(&mut self, images: &ReferenceImages) -> Extraction {
        let mut out = Extraction::default();
        match images {
            ReferenceImages::None => {}
            ReferenceImages::Directory(dir) => match list_photos(dir) {
                Ok(paths) => {
                    for path in paths {
                        self.extract_file(&path, &mut out);
                    }
                }
                Err(source) => out.skipped.push(PersonImageError::Directory {
                    path: dir.display().to_string(),
                    source,
                }),
            },
            ReferenceImages::Files(paths) => {
                for path in paths {
                    self.extract_file(path, &mut out);
                }
            }
            ReferenceImages::Blobs(blobs) => {
                for (i, data) in blobs.iter().enumerate() {
                    let origin = format!("<reference blob {i}>");
                    match photo::load_rgb_bytes(data, &origin) {
                        Ok(image) => self.extract_image(&image, origin, &mut out),
                        Err(e) => out.skipped.push(e.into()),
                    }
                }
            }
        }
        out
    }

    fn extract_file(&mut self, path: &Path, out: &mut Extraction) {
        match photo::load_rgb(path) {
            Ok(image) => self.extract_image(&image, path.display().to_string(), out),
            Err(e) => out.skipped.push(e.into()),
        }
    }

    fn extract_image(&mut self, image: &RgbImage, origin: String, out: &mut Extraction) {
        out.images_read += 1;

        // Only encode what the policy can use.
        let limit = match self.config.reference_faces {
            ReferenceFacePolicy::First => 1,
            ReferenceFacePolicy::Reject => 2,
            ReferenceFacePolicy::All => self.config.max_faces_per_image,
        };

        let faces = match self.backend.detect_and_encode(image, limit) {
            Ok(faces) => faces,
            Err(source) => {
                out.skipped.push(PersonImageError::Backend { origin, source });
                return;
            }
        };

        if faces.is_empty() {
            tracing::debug!(origin = %origin, "no face in reference image");
            return;
        }

        match self.config.reference_faces {
            ReferenceFacePolicy::Reject if faces.len() > 1 => {
                out.skipped.push(PersonImageError::MultipleFaces {
                    origin,
                    faces: faces.len(),
                });
            }
            _ => out.signatures.extend(faces.into_iter().map(|f| f.signature)),
        }
    }
}

/// Photo files in `dir`, sorted by file name.
fn list_photos(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && photo::is_photo_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
