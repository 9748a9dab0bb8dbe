use geoface_core::gallery::Gallery;
use geoface_core::EmbeddingCache;
use geoface_sync::{HttpFetcher, RecordSource, SyncError, SyncReport, Synchronizer};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Error, Debug)]
pub enum GallerySyncError {
    #[error("no record source configured (set GEOFACE_RECORDS_FILE or GEOFACE_FIRESTORE_PROJECT)")]
    NoSource,
    #[error("a sync is already running")]
    Busy,
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Daemon-side sync: one run at a time, swap under the gallery write lock.
pub struct GallerySync {
    synchronizer: Synchronizer<HttpFetcher>,
    source: Option<Box<dyn RecordSource>>,
    running: Mutex<()>,
}

impl GallerySync {
    pub fn new(synchronizer: Synchronizer<HttpFetcher>, source: Option<Box<dyn RecordSource>>) -> Self {
        Self { synchronizer, source, running: Mutex::new(()) }
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Download without blocking identifications, then swap and invalidate
    /// the cache while holding the write lock.
    pub async fn run(&self, gallery: &RwLock<Gallery>, cache: &EmbeddingCache) -> Result<SyncReport, GallerySyncError> {
        let source = self.source.as_deref().ok_or(GallerySyncError::NoSource)?;
        let _running = self.running.try_lock().map_err(|_| GallerySyncError::Busy)?;

        let staged = self.synchronizer.stage(source).await?;

        let _writer = gallery.write().await;
        tracing::debug!("gallery write lock acquired for swap");
        Ok(self.synchronizer.commit(staged, Some(cache))?)
    }
}
