//! Embedding search over a gallery.
//!
//! [`EmbeddingSearch`] is the seam the identification pipeline depends on.
//! [`ArcFaceSearch`] implements it with SCRFD detection and ArcFace
//! embeddings, ranking gallery references by cosine distance.

use crate::cache::{CacheError, EmbeddingCache, IndexEntry};
use crate::detector::{DetectorError, FaceDetector};
use crate::gallery::{Gallery, ReferenceImage};
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_MODEL_VERSION};
use crate::types::Embedding;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Cosine distance threshold for ArcFace matches.
pub const DEFAULT_MAX_DISTANCE: f32 = 0.68;

/// A gallery reference close enough to the probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Path of the reference image (under the gallery root).
    pub identity: PathBuf,
    pub distance: f32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("no clear face detected in the image")]
    NoFaceDetected,
    #[error("search unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Failed(String),
}

impl From<CacheError> for SearchError {
    fn from(e: CacheError) -> Self {
        SearchError::Failed(e.to_string())
    }
}

impl From<DetectorError> for SearchError {
    fn from(e: DetectorError) -> Self {
        SearchError::Failed(format!("face detection: {e}"))
    }
}

impl From<RecognizerError> for SearchError {
    fn from(e: RecognizerError) -> Self {
        SearchError::Failed(format!("face embedding: {e}"))
    }
}

/// Find gallery references matching the face in `probe`.
///
/// Results are ordered by ascending distance. A probe without a face is
/// `Err(NoFaceDetected)`, never an empty list.
pub trait EmbeddingSearch {
    fn find(&mut self, probe: &RgbImage, gallery: &Gallery) -> Result<Vec<Candidate>, SearchError>;
}

/// Rank every index entry against the probe and keep those within `max_distance`.
///
/// The whole index is always traversed.
pub fn rank(probe: &Embedding, entries: &[IndexEntry], root: &Path, max_distance: f32) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = entries
        .iter()
        .map(|entry| (entry, probe.cosine_distance(&entry.embedding)))
        .filter(|(_, distance)| *distance <= max_distance)
        .map(|(entry, distance)| Candidate {
            identity: root.join(&entry.identity),
            distance,
        })
        .collect();
    candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    candidates
}

/// SCRFD + ArcFace search with a shared embedding cache.
pub struct ArcFaceSearch {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    cache: Arc<EmbeddingCache>,
    max_distance: f32,
}

impl ArcFaceSearch {
    /// Load both models from `model_dir`. Missing or broken models are `Unavailable`.
    pub fn load(model_dir: &Path, cache: Arc<EmbeddingCache>, max_distance: f32) -> Result<Self, SearchError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))
            .map_err(|e| SearchError::Unavailable(e.to_string()))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))
            .map_err(|e| SearchError::Unavailable(e.to_string()))?;
        Ok(Self { detector, recognizer, cache, max_distance })
    }

    /// Embedding of the most confident face, if any.
    fn embed(&mut self, image: &RgbImage) -> Result<Option<Embedding>, SearchError> {
        let faces = self.detector.detect(image)?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };
        tracing::debug!(faces = faces.len(), confidence = face.confidence, "face detected");
        Ok(Some(self.recognizer.extract(image, face)?))
    }

    fn build_index(&mut self, gallery: &Gallery, references: &[ReferenceImage]) -> Result<Vec<IndexEntry>, SearchError> {
        let mut entries = Vec::with_capacity(references.len());
        for reference in references {
            let image = match image::open(&reference.path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %reference.path.display(), error = %e, "skipping unreadable reference image");
                    continue;
                }
            };
            let Some(embedding) = self.embed(&image)? else {
                tracing::warn!(path = %reference.path.display(), "no face in reference image; skipped");
                continue;
            };
            let identity = reference
                .path
                .strip_prefix(gallery.root())
                .unwrap_or(&reference.path)
                .to_path_buf();
            entries.push(IndexEntry {
                employee_id: reference.employee_id.clone(),
                identity,
                embedding,
            });
        }
        tracing::info!(indexed = entries.len(), references = references.len(), "embedding index built");
        Ok(entries)
    }
}

impl EmbeddingSearch for ArcFaceSearch {
    fn find(&mut self, probe: &RgbImage, gallery: &Gallery) -> Result<Vec<Candidate>, SearchError> {
        let probe_embedding = self.embed(probe)?.ok_or(SearchError::NoFaceDetected)?;

        let cache = Arc::clone(&self.cache);
        let index = cache.get_or_build(gallery, ARCFACE_MODEL_VERSION, |references| {
            self.build_index(gallery, references)
        })?;

        let candidates = rank(&probe_embedding, &index.entries, gallery.root(), self.max_distance);
        tracing::debug!(
            candidates = candidates.len(),
            best = candidates.first().map(|c| c.distance),
            "gallery search complete"
        );
        Ok(candidates)
    }
}
