use geoface_sync::{FirestoreSource, JsonFileSource, RecordSource, SourceError, DEFAULT_COLLECTION};
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Listen address (default: 0.0.0.0:5000).
    pub bind_addr: String,
    /// Gallery root: one directory per employee id.
    pub gallery_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Largest cosine distance accepted as a match.
    pub max_distance: f32,
    /// Deadline for one identification, queueing included.
    pub identify_timeout_secs: u64,
    /// Number of identification worker threads.
    pub workers: usize,
    /// Per-image download timeout during sync.
    pub fetch_timeout_secs: u64,
    /// Rebuild the gallery before serving.
    pub sync_on_startup: bool,
    /// JSON export of the enrollment collection. Takes precedence over Firestore.
    pub records_file: Option<PathBuf>,
    pub firestore_project: Option<String>,
    pub firestore_collection: String,
    /// Bearer token for the Firestore REST API.
    pub firestore_token: Option<String>,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from `GEOFACE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("GEOFACE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            gallery_dir: env_path("GEOFACE_GALLERY_DIR").unwrap_or_else(geoface_core::default_gallery_dir),
            model_dir: env_path("GEOFACE_MODEL_DIR").unwrap_or_else(geoface_core::default_model_dir),
            max_distance: env_f32("GEOFACE_MAX_DISTANCE", geoface_core::DEFAULT_MAX_DISTANCE),
            identify_timeout_secs: env_u64("GEOFACE_IDENTIFY_TIMEOUT_SECS", 30),
            workers: env_usize("GEOFACE_WORKERS", 2).max(1),
            fetch_timeout_secs: env_u64("GEOFACE_FETCH_TIMEOUT_SECS", 10),
            sync_on_startup: std::env::var("GEOFACE_SYNC_ON_STARTUP")
                .map(|v| v != "0" && !v.is_empty())
                .unwrap_or(false),
            records_file: env_path("GEOFACE_RECORDS_FILE"),
            firestore_project: env_string("GEOFACE_FIRESTORE_PROJECT"),
            firestore_collection: env_string("GEOFACE_FIRESTORE_COLLECTION")
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            firestore_token: env_string("GEOFACE_FIRESTORE_TOKEN"),
            max_upload_bytes: env_usize("GEOFACE_MAX_UPLOAD_BYTES", 16 * 1024 * 1024),
        }
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_secs(self.identify_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// The configured record source, if any.
    pub fn record_source(&self) -> Result<Option<Box<dyn RecordSource>>, SourceError> {
        if let Some(path) = &self.records_file {
            return Ok(Some(Box::new(JsonFileSource::new(path))));
        }
        match &self.firestore_project {
            Some(project) => Ok(Some(Box::new(FirestoreSource::new(
                project.clone(),
                self.firestore_collection.clone(),
                self.firestore_token.clone(),
                self.fetch_timeout(),
            )?))),
            None => Ok(None),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
