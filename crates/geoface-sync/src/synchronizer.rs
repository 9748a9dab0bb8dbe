//! Gallery rebuild: download into a staging directory, then swap it in.
//!
//! [`Synchronizer::stage`] does all the slow work without touching the live
//! gallery. [`Synchronizer::commit`] is the short critical section: rename
//! the staging tree into place and invalidate the embedding cache.

use crate::fetch::ImageFetcher;
use crate::record::RemoteRecord;
use crate::source::{RecordSource, SourceError};
use geoface_core::cache::{self, CacheError, EmbeddingCache};
use geoface_core::gallery::{Gallery, GalleryError};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("record source: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Counters of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub images_downloaded: usize,
    pub employees_updated: usize,
    pub records_skipped: usize,
    pub fetch_failures: usize,
}

/// A fully downloaded gallery that has not been swapped in yet.
///
/// Dropping it without [`Synchronizer::commit`] deletes the staging directory.
#[derive(Debug)]
pub struct StagedGallery {
    dir: PathBuf,
    report: SyncReport,
    installed: bool,
}

impl StagedGallery {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn report(&self) -> &SyncReport {
        &self.report
    }
}

impl Drop for StagedGallery {
    fn drop(&mut self) {
        if self.installed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, path = %self.dir.display(), "could not remove staging directory");
            }
        }
    }
}

/// Rebuilds one gallery from a record source.
pub struct Synchronizer<F> {
    gallery: Gallery,
    fetcher: F,
}

impl<F: ImageFetcher> Synchronizer<F> {
    pub fn new(gallery: Gallery, fetcher: F) -> Self {
        Self { gallery, fetcher }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Fetch all records and download their images into a fresh staging directory.
    ///
    /// A source failure aborts; invalid records and failed downloads are
    /// logged and counted.
    pub async fn stage(&self, source: &dyn RecordSource) -> Result<StagedGallery, SyncError> {
        let mut staged = StagedGallery {
            dir: self.gallery.create_staging_dir()?,
            report: SyncReport::default(),
            installed: false,
        };

        tracing::info!(source = %source.describe(), staging = %staged.dir.display(), "sync started");
        let records = source.fetch_all().await?;
        tracing::info!(records = records.len(), "records fetched");

        let mut employees = HashSet::new();
        for record in &records {
            if let Some(employee_id) = self.stage_record(record, &mut staged).await? {
                employees.insert(employee_id);
            }
        }
        staged.report.employees_updated = employees.len();

        Ok(staged)
    }

    /// Returns the employee whose partition the record populated, if valid.
    async fn stage_record(
        &self,
        record: &RemoteRecord,
        staged: &mut StagedGallery,
    ) -> Result<Option<String>, SyncError> {
        let enrollment = match record.validate() {
            Ok(enrollment) => enrollment,
            Err(e) => {
                tracing::warn!(error = %e, "skipping record");
                staged.report.records_skipped += 1;
                return Ok(None);
            }
        };

        let partition = staged.dir.join(&enrollment.employee_id);
        tokio::fs::create_dir_all(&partition)
            .await
            .map_err(|e| SyncError::Io { path: partition.clone(), source: e })?;

        let total = enrollment.image_urls.len();
        for (idx, url) in &enrollment.image_urls {
            let bytes = match self.fetcher.fetch(url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(
                        employee_id = %enrollment.employee_id,
                        %url,
                        error = %e,
                        "image download failed"
                    );
                    staged.report.fetch_failures += 1;
                    continue;
                }
            };

            let path = partition.join(format!("{}_{}.jpg", enrollment.record_id, idx));
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| SyncError::Io { path: path.clone(), source: e })?;
            staged.report.images_downloaded += 1;
            tracing::debug!(
                employee_id = %enrollment.employee_id,
                image = idx + 1,
                total,
                bytes = bytes.len(),
                "image downloaded"
            );
        }

        Ok(Some(enrollment.employee_id))
    }

    /// Swap the staged tree in and invalidate the embedding cache.
    ///
    /// Callers holding a gallery lock should hold it in write mode around this call.
    pub fn commit(&self, mut staged: StagedGallery, cache: Option<&EmbeddingCache>) -> Result<SyncReport, SyncError> {
        self.gallery.install(&staged.dir)?;
        staged.installed = true;

        let removed = match cache {
            Some(cache) => cache.invalidate(&self.gallery)?,
            None => cache::remove_cache_file(&self.gallery)?,
        };

        let report = std::mem::take(&mut staged.report);
        tracing::info!(
            images = report.images_downloaded,
            employees = report.employees_updated,
            skipped = report.records_skipped,
            fetch_failures = report.fetch_failures,
            cache_removed = removed,
            "sync complete"
        );
        Ok(report)
    }

    /// Stage then commit, for callers without concurrent readers.
    pub async fn sync(&self, source: &dyn RecordSource, cache: Option<&EmbeddingCache>) -> Result<SyncReport, SyncError> {
        let staged = self.stage(source).await?;
        self.commit(staged, cache)
    }
}
