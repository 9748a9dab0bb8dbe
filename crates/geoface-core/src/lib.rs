//! geoface-core: Spoof detection and face identification engine.
//!
//! A heuristic photo-of-a-photo detector guards an embedding search over a
//! directory-per-employee gallery. The search uses SCRFD for face detection
//! and ArcFace for recognition, both running via ONNX Runtime on the CPU.

pub mod alignment;
pub mod cache;
pub mod detector;
pub mod edges;
pub mod gallery;
pub mod image_ops;
pub mod pipeline;
pub mod recognizer;
pub mod search;
pub mod spectrum;
pub mod spoof;
pub mod types;

use std::path::PathBuf;

pub use cache::{CacheError, EmbeddingCache, GalleryIndex, IndexEntry};
pub use gallery::{Gallery, GalleryError, ReferenceImage, CACHE_FILE_NAME};
pub use pipeline::Identifier;
pub use search::{ArcFaceSearch, Candidate, EmbeddingSearch, SearchError, DEFAULT_MAX_DISTANCE};
pub use spoof::{SpoofAnalysis, SpoofConfig, SpoofDetector, SpoofSignal};
pub use types::{BoundingBox, Embedding, Identification, IdentifyError};

/// Per-user data directory: `$XDG_DATA_HOME/geoface`, else `~/.local/share/geoface`.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("geoface")
}

/// Where `det_10g.onnx` and `w600k_r50.onnx` are looked up by default.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// Default gallery root.
pub fn default_gallery_dir() -> PathBuf {
    data_dir().join("employee_face_db")
}
