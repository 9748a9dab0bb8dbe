//! Explicit embedding cache for a gallery.
//!
//! The index of reference embeddings is expensive to build (one detection and
//! one recognition pass per reference image). It is kept in memory, persisted
//! next to the gallery partitions, and keyed by [`Gallery::fingerprint`]: an
//! index whose fingerprint no longer matches the gallery is never used.

use crate::gallery::{Gallery, GalleryError, ReferenceImage};
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One reference image's embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub employee_id: String,
    /// Path of the reference image, relative to the gallery root.
    pub identity: PathBuf,
    pub embedding: Embedding,
}

/// Embeddings of every usable reference image for one gallery version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryIndex {
    pub fingerprint: String,
    pub model_version: String,
    pub entries: Vec<IndexEntry>,
}

/// Shared, lazily rebuilt gallery index.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    current: Mutex<Option<Arc<GalleryIndex>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index for the gallery's current content, building it if needed.
    ///
    /// Lookup order: in-memory index, persisted cache file, `build`. Both stored
    /// forms are accepted only if fingerprint and model version match. The
    /// lock is held while building so concurrent searches wait for one build.
    pub fn get_or_build<E, F>(
        &self,
        gallery: &Gallery,
        model_version: &str,
        build: F,
    ) -> Result<Arc<GalleryIndex>, E>
    where
        E: From<CacheError>,
        F: FnOnce(&[ReferenceImage]) -> Result<Vec<IndexEntry>, E>,
    {
        let fingerprint = gallery.fingerprint().map_err(CacheError::from)?;
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(index) = current.as_ref() {
            if index.fingerprint == fingerprint && index.model_version == model_version {
                return Ok(Arc::clone(index));
            }
            tracing::info!("gallery changed since last index build; rebuilding");
        }

        if let Some(index) = load_persisted(gallery, &fingerprint, model_version) {
            tracing::info!(entries = index.entries.len(), "loaded embedding cache from disk");
            let index = Arc::new(index);
            *current = Some(Arc::clone(&index));
            return Ok(index);
        }

        let references = gallery.reference_images().map_err(CacheError::from)?;
        tracing::info!(references = references.len(), "building embedding index");
        let entries = build(&references)?;

        let index = Arc::new(GalleryIndex {
            fingerprint,
            model_version: model_version.to_string(),
            entries,
        });

        if let Err(e) = persist(gallery, &index) {
            tracing::warn!(error = %e, "could not persist embedding cache; continuing in memory");
        }

        *current = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Drop the in-memory index and delete the persisted cache file.
    ///
    /// Returns whether a cache file was removed.
    pub fn invalidate(&self, gallery: &Gallery) -> Result<bool, CacheError> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
        remove_cache_file(gallery)
    }

    pub fn is_loaded(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Delete the persisted cache file of a gallery, if present.
pub fn remove_cache_file(gallery: &Gallery) -> Result<bool, CacheError> {
    let path = gallery.cache_path();
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "embedding cache removed");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::Io { path, source: e }),
    }
}

fn load_persisted(gallery: &Gallery, fingerprint: &str, model_version: &str) -> Option<GalleryIndex> {
    let path = gallery.cache_path();
    let bytes = fs::read(&path).ok()?;
    match serde_json::from_slice::<GalleryIndex>(&bytes) {
        Ok(index) if index.fingerprint == fingerprint && index.model_version == model_version => {
            Some(index)
        }
        Ok(_) => {
            tracing::debug!(path = %path.display(), "stale embedding cache on disk");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "unreadable embedding cache on disk");
            None
        }
    }
}

fn persist(gallery: &Gallery, index: &GalleryIndex) -> Result<(), CacheError> {
    let path = gallery.cache_path();
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec(index)?;
    fs::write(&tmp, bytes).map_err(|e| CacheError::Io { path: tmp.clone(), source: e })?;
    fs::rename(&tmp, &path).map_err(|e| CacheError::Io { path: path.clone(), source: e })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn seed(gallery: &Gallery, employee: &str, file: &str) {
        let dir = gallery.root().join(employee);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), file.as_bytes()).unwrap();
    }

    fn fake_entries(refs: &[ReferenceImage]) -> Result<Vec<IndexEntry>, CacheError> {
        Ok(refs
            .iter()
            .map(|r| IndexEntry {
                employee_id: r.employee_id.clone(),
                identity: PathBuf::from(&r.employee_id).join(r.path.file_name().unwrap()),
                embedding: Embedding { values: vec![1.0, 0.0], model_version: None },
            })
            .collect())
    }

    #[test]
    fn test_builds_once_then_reuses() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(tmp.path().join("db")).unwrap();
        seed(&gallery, "E1", "a_0.jpg");

        let cache = EmbeddingCache::new();
        let builds = Cell::new(0);
        let build = |refs: &[ReferenceImage]| {
            builds.set(builds.get() + 1);
            fake_entries(refs)
        };

        let first = cache.get_or_build(&gallery, "m", build).unwrap();
        assert_eq!(first.entries.len(), 1);
        assert!(gallery.cache_path().exists());

        let second = cache
            .get_or_build(&gallery, "m", |refs: &[ReferenceImage]| {
                builds.set(builds.get() + 1);
                fake_entries(refs)
            })
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.get(), 1);
    }

    #[test]
    fn test_rebuilds_when_gallery_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(tmp.path().join("db")).unwrap();
        seed(&gallery, "E1", "a_0.jpg");

        let cache = EmbeddingCache::new();
        cache.get_or_build(&gallery, "m", fake_entries).unwrap();

        seed(&gallery, "E2", "b_0.jpg");
        let index = cache.get_or_build(&gallery, "m", fake_entries).unwrap();
        assert_eq!(index.entries.len(), 2);
    }

    #[test]
    fn test_rebuilds_when_model_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(tmp.path().join("db")).unwrap();
        seed(&gallery, "E1", "a_0.jpg");

        let cache = EmbeddingCache::new();
        cache.get_or_build(&gallery, "m1", fake_entries).unwrap();
        let index = cache.get_or_build(&gallery, "m2", fake_entries).unwrap();
        assert_eq!(index.model_version, "m2");
    }

    #[test]
    fn test_persisted_cache_loaded_by_fresh_instance() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(tmp.path().join("db")).unwrap();
        seed(&gallery, "E1", "a_0.jpg");

        EmbeddingCache::new().get_or_build(&gallery, "m", fake_entries).unwrap();

        let fresh = EmbeddingCache::new();
        let index = fresh
            .get_or_build(&gallery, "m", |_: &[ReferenceImage]| -> Result<Vec<IndexEntry>, CacheError> {
                panic!("should load from disk")
            })
            .unwrap();
        assert_eq!(index.entries[0].employee_id, "E1");
    }

    #[test]
    fn test_invalidate_removes_file_and_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(tmp.path().join("db")).unwrap();
        seed(&gallery, "E1", "a_0.jpg");

        let cache = EmbeddingCache::new();
        cache.get_or_build(&gallery, "m", fake_entries).unwrap();
        assert!(cache.is_loaded());

        assert!(cache.invalidate(&gallery).unwrap());
        assert!(!cache.is_loaded());
        assert!(!gallery.cache_path().exists());
        // Second invalidation finds nothing to delete
        assert!(!cache.invalidate(&gallery).unwrap());
    }

    #[test]
    fn test_build_error_propagates() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(tmp.path().join("db")).unwrap();
        let cache = EmbeddingCache::new();
        let result = cache.get_or_build(&gallery, "m", |_: &[ReferenceImage]| {
            Err(CacheError::Io {
                path: PathBuf::from("x"),
                source: io::Error::new(io::ErrorKind::Other, "boom"),
            })
        });
        assert!(result.is_err());
        assert!(!cache.is_loaded());
    }
}
