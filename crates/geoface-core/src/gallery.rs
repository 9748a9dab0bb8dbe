//! On-disk face gallery: one directory per employee id, reference images inside.
//!
//! ```text
//! employee_face_db/
//!   representations_arcface.json   <- derived embedding cache (not a partition)
//!   E001/
//!     docA_0.jpg
//!     docA_1.jpg
//!   E002/
//!     docB_0.jpg
//! ```
//!
//! The gallery is replaced wholesale: a new tree is built in a sibling staging
//! directory and swapped in with [`Gallery::install`].

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;

/// File name of the persisted embedding cache at the gallery root.
pub const CACHE_FILE_NAME: &str = "representations_arcface.json";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("gallery root {0} has no parent directory for staging")]
    NoParent(PathBuf),
}

impl GalleryError {
    fn io(path: &Path, source: io::Error) -> Self {
        GalleryError::Io { path: path.to_path_buf(), source }
    }
}

/// A reference image belonging to one employee partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub employee_id: String,
    pub path: PathBuf,
}

/// Handle to a gallery root directory.
#[derive(Debug, Clone)]
pub struct Gallery {
    root: PathBuf,
}

impl Gallery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the gallery, creating an empty root if missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let gallery = Self::new(root);
        fs::create_dir_all(&gallery.root).map_err(|e| GalleryError::io(&gallery.root, e))?;
        Ok(gallery)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_path(&self) -> PathBuf {
        self.root.join(CACHE_FILE_NAME)
    }

    /// Employee ids with a partition directory, sorted.
    pub fn partitions(&self) -> Result<Vec<String>, GalleryError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GalleryError::io(&self.root, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GalleryError::io(&self.root, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| GalleryError::io(&entry.path(), e))?
                .is_dir();
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Every reference image in the gallery, sorted by partition then file name.
    pub fn reference_images(&self) -> Result<Vec<ReferenceImage>, GalleryError> {
        let mut images = Vec::new();
        for employee_id in self.partitions()? {
            let dir = self.root.join(&employee_id);
            let mut files = Vec::new();
            for entry in fs::read_dir(&dir).map_err(|e| GalleryError::io(&dir, e))? {
                let entry = entry.map_err(|e| GalleryError::io(&dir, e))?;
                let path = entry.path();
                if path.is_file() && is_image_file(&path) {
                    files.push(path);
                }
            }
            files.sort();
            images.extend(files.into_iter().map(|path| ReferenceImage {
                employee_id: employee_id.clone(),
                path,
            }));
        }
        Ok(images)
    }

    /// Employee id owning a reference image: the name of its containing partition.
    ///
    /// Returns `None` for paths that are not directly inside a partition of this gallery.
    pub fn employee_for(&self, identity: &Path) -> Option<String> {
        let relative = identity.strip_prefix(&self.root).unwrap_or(identity);
        let mut components = relative.components();
        let partition = components.next()?.as_os_str().to_str()?.to_string();
        // Exactly partition/file
        components.next()?;
        if components.next().is_some() {
            return None;
        }
        Some(partition)
    }

    /// True when at least one partition exists.
    pub fn is_synced(&self) -> bool {
        self.partitions().map(|p| !p.is_empty()).unwrap_or(false)
    }

    /// Content version of the gallery.
    ///
    /// SHA-256 over every reference image's relative path, byte length and
    /// modification time. Any add, remove, rewrite or sync changes it.
    pub fn fingerprint(&self) -> Result<String, GalleryError> {
        let mut hasher = Sha256::new();
        for image in self.reference_images()? {
            let meta = fs::metadata(&image.path).map_err(|e| GalleryError::io(&image.path, e))?;
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let relative = image.path.strip_prefix(&self.root).unwrap_or(&image.path);
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(meta.len().to_le_bytes());
            hasher.update(mtime.to_le_bytes());
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Fresh, empty staging directory next to the root (same filesystem, so
    /// the final swap is a rename).
    pub fn create_staging_dir(&self) -> Result<PathBuf, GalleryError> {
        let staging = self.sibling("staging")?;
        fs::create_dir_all(&staging).map_err(|e| GalleryError::io(&staging, e))?;
        Ok(staging)
    }

    /// Replace the gallery root with a fully built staging directory.
    ///
    /// The previous root is renamed aside, the staging directory renamed into
    /// place, then the previous tree is deleted. If the second rename fails
    /// the previous root is restored.
    pub fn install(&self, staging: &Path) -> Result<(), GalleryError> {
        let backup = self.sibling("old")?;
        let had_root = self.root.exists();

        if had_root {
            fs::rename(&self.root, &backup).map_err(|e| GalleryError::io(&self.root, e))?;
        }

        if let Err(e) = fs::rename(staging, &self.root) {
            if had_root {
                if let Err(restore) = fs::rename(&backup, &self.root) {
                    tracing::error!(
                        error = %restore,
                        backup = %backup.display(),
                        "failed to restore previous gallery after swap failure"
                    );
                }
            }
            return Err(GalleryError::io(staging, e));
        }

        if had_root {
            if let Err(e) = fs::remove_dir_all(&backup) {
                tracing::warn!(error = %e, path = %backup.display(), "could not remove previous gallery");
            }
        }

        tracing::info!(root = %self.root.display(), "gallery swapped in");
        Ok(())
    }

    fn sibling(&self, kind: &str) -> Result<PathBuf, GalleryError> {
        let parent = self
            .root
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = self
            .root
            .file_name()
            .ok_or_else(|| GalleryError::NoParent(self.root.clone()))?
            .to_string_lossy()
            .into_owned();
        Ok(parent.join(format!(".{name}.{kind}-{}", uuid::Uuid::new_v4())))
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            matches!(
                e.to_ascii_lowercase().as_str(),
                "jpg" | "jpeg" | "png" | "bmp" | "webp"
            )
        })
        .unwrap_or(false)
}
