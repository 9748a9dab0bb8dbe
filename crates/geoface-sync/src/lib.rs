//! geoface-sync: Rebuilds the face gallery from enrollment records.
//!
//! Records come from a [`RecordSource`] (JSON export or Firestore), images
//! are downloaded through an [`ImageFetcher`], and the result replaces the
//! live gallery in a single directory swap.

pub mod fetch;
pub mod record;
pub mod source;
pub mod synchronizer;

pub use fetch::{FetchError, HttpFetcher, ImageFetcher, DEFAULT_FETCH_TIMEOUT};
pub use record::{EnrollmentRecord, RecordError, RemoteRecord};
pub use source::{FirestoreSource, JsonFileSource, RecordSource, SourceError, DEFAULT_COLLECTION};
pub use synchronizer::{StagedGallery, SyncError, SyncReport, Synchronizer};
