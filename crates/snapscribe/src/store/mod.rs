//! Collaborator seams: where jobs are persisted and where image bytes live.

use async_trait::async_trait;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::job::{ExtractionJob, ImageRef, JobStatus};

pub mod filesystem;
pub mod memory;
pub mod sqlite;

pub use filesystem::FilesystemObjectStore;
pub use memory::{MemoryJobStore, MemoryObjectStore};
pub use sqlite::SqliteJobStore;

#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {job_id} has {total} items, cannot record {processed} as processed")]
    ProgressOutOfRange {
        job_id: String,
        processed: usize,
        total: usize,
    },

    #[error("Job storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Durable job records.
///
/// Every status change is checked against the job state machine; a write
/// that would move a job backwards fails with `InvalidTransition`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new `PENDING` job together with its references in
    /// arrival order.
    async fn create(&self, job: &ExtractionJob, items: &[ImageRef]) -> Result<(), JobStoreError>;

    async fn get(&self, job_id: &str) -> Result<ExtractionJob, JobStoreError>;

    async fn items(&self, job_id: &str) -> Result<Vec<ImageRef>, JobStoreError>;

    async fn mark_processing(&self, job_id: &str) -> Result<(), JobStoreError>;

    /// Records progress. A value lower than the stored one is ignored.
    async fn set_progress(&self, job_id: &str, processed: usize) -> Result<(), JobStoreError>;

    /// `note` is kept in the error field of a partial completion.
    async fn complete(
        &self,
        job_id: &str,
        output: String,
        note: Option<String>,
    ) -> Result<(), JobStoreError>;

    async fn fail(&self, job_id: &str, message: String) -> Result<(), JobStoreError>;

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ExtractionJob>, JobStoreError>;

    /// Jobs still `PENDING` or `PROCESSING`.
    async fn list_unfinished(&self) -> Result<Vec<ExtractionJob>, JobStoreError>;
}

/// Raw image content plus its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Unsupported media type '{mime_type}' for {reference}")]
    UnsupportedMedia { reference: String, mime_type: String },

    #[error("Reference escapes the uploads root: {0}")]
    OutsideRoot(String),

    #[error("Failed to read {reference}: {source}")]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

impl ObjectStoreError {
    /// Only I/O hiccups are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ObjectStoreError::Io { .. })
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch(&self, image: &ImageRef) -> Result<ImageData, ObjectStoreError>;
}

/// Media type from the file extension, when it names an image.
pub(crate) fn image_mime_type(image: &ImageRef) -> Option<String> {
    mime_guess::from_path(image.file_name())
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .map(|mime| mime.essence_str().to_string())
}

/// Shared check for the state machine, used by every store implementation.
pub(crate) fn check_transition(
    job: &ExtractionJob,
    next: JobStatus,
) -> Result<(), JobStoreError> {
    if job.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(JobStoreError::InvalidTransition {
            job_id: job.id.clone(),
            from: job.status,
            to: next,
        })
    }
}
