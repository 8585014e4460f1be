//! In-process stores for tests and embedding.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    check_transition, image_mime_type, ImageData, JobStore, JobStoreError, ObjectStore,
    ObjectStoreError,
};
use crate::job::{ExtractionJob, ImageRef, JobStatus};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        log::warn!("Memory store lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        log::warn!("Memory store lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

struct Entry {
    job: ExtractionJob,
    items: Vec<ImageRef>,
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Entry>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, job_id: &str, f: F) -> Result<(), JobStoreError>
    where
        F: FnOnce(&mut ExtractionJob) -> Result<(), JobStoreError>,
    {
        let mut jobs = write(&self.jobs);
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        f(&mut entry.job)?;
        entry.job.updated_at = Utc::now();
        Ok(())
    }

    fn finish(job: &mut ExtractionJob, status: JobStatus) -> Result<(), JobStoreError> {
        check_transition(job, status)?;
        job.status = status;
        job.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &ExtractionJob, items: &[ImageRef]) -> Result<(), JobStoreError> {
        write(&self.jobs).insert(
            job.id.clone(),
            Entry {
                job: job.clone(),
                items: items.to_vec(),
            },
        );
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<ExtractionJob, JobStoreError> {
        read(&self.jobs)
            .get(job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))
    }

    async fn items(&self, job_id: &str) -> Result<Vec<ImageRef>, JobStoreError> {
        read(&self.jobs)
            .get(job_id)
            .map(|entry| entry.items.clone())
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))
    }

    async fn mark_processing(&self, job_id: &str) -> Result<(), JobStoreError> {
        self.update(job_id, |job| {
            check_transition(job, JobStatus::Processing)?;
            job.status = JobStatus::Processing;
            Ok(())
        })
    }

    async fn set_progress(&self, job_id: &str, processed: usize) -> Result<(), JobStoreError> {
        self.update(job_id, |job| {
            if job.status != JobStatus::Processing {
                return Err(JobStoreError::InvalidTransition {
                    job_id: job.id.clone(),
                    from: job.status,
                    to: JobStatus::Processing,
                });
            }
            if processed > job.total_items {
                return Err(JobStoreError::ProgressOutOfRange {
                    job_id: job.id.clone(),
                    processed,
                    total: job.total_items,
                });
            }
            job.processed_items = job.processed_items.max(processed);
            Ok(())
        })
    }

    async fn complete(
        &self,
        job_id: &str,
        output: String,
        note: Option<String>,
    ) -> Result<(), JobStoreError> {
        self.update(job_id, |job| {
            Self::finish(job, JobStatus::Completed)?;
            job.output = Some(output);
            job.error = note;
            Ok(())
        })
    }

    async fn fail(&self, job_id: &str, message: String) -> Result<(), JobStoreError> {
        self.update(job_id, |job| {
            Self::finish(job, JobStatus::Failed)?;
            job.error = Some(message);
            Ok(())
        })
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ExtractionJob>, JobStoreError> {
        let mut jobs: Vec<ExtractionJob> = read(&self.jobs)
            .values()
            .filter(|entry| entry.job.owner_id == owner_id)
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn list_unfinished(&self) -> Result<Vec<ExtractionJob>, JobStoreError> {
        let mut jobs: Vec<ExtractionJob> = read(&self.jobs)
            .values()
            .filter(|entry| !entry.job.is_finished())
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}

/// Images keyed by their exact reference.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<ImageRef, ImageData>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `bytes` under `image`, typed by its file extension
    /// (`application/octet-stream` when the extension is not an image).
    pub fn insert(&self, image: impl Into<ImageRef>, bytes: impl Into<Vec<u8>>) {
        let image = image.into();
        let mime_type =
            image_mime_type(&image).unwrap_or_else(|| "application/octet-stream".to_string());
        write(&self.objects).insert(
            image,
            ImageData {
                bytes: bytes.into(),
                mime_type,
            },
        );
    }

    pub fn len(&self) -> usize {
        read(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch(&self, image: &ImageRef) -> Result<ImageData, ObjectStoreError> {
        let data = read(&self.objects)
            .get(image)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(image.to_string()))?;
        if !data.mime_type.starts_with("image/") {
            return Err(ObjectStoreError::UnsupportedMedia {
                reference: image.to_string(),
                mime_type: data.mime_type,
            });
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_job_lifecycle() {
        let store = MemoryJobStore::new();
        let job = ExtractionJob::new("o", "l", 2);
        store
            .create(&job, &["b.png".into(), "a.png".into()])
            .await
            .unwrap();

        assert_eq!(
            store.items(&job.id).await.unwrap(),
            vec![ImageRef::from("b.png"), ImageRef::from("a.png")]
        );

        store.mark_processing(&job.id).await.unwrap();
        store.set_progress(&job.id, 2).await.unwrap();
        store.set_progress(&job.id, 1).await.unwrap();
        store
            .complete(&job.id, "x".into(), Some("note".into()))
            .await
            .unwrap();

        let done = store.get(&job.id).await.unwrap();
        assert_eq!(done.processed_items, 2);
        assert_eq!(done.error.as_deref(), Some("note"));
        assert!(done.snapshot().partial);
        assert!(store.list_unfinished().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_job_rejects_backwards_moves() {
        let store = MemoryJobStore::new();
        let job = ExtractionJob::new("o", "l", 1);
        store.create(&job, &[]).await.unwrap();

        assert!(matches!(
            store.complete(&job.id, "x".into(), None).await,
            Err(JobStoreError::InvalidTransition { .. })
        ));
        store.fail(&job.id, "never ran".into()).await.unwrap();
        assert!(store.mark_processing(&job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_object_store() {
        let store = MemoryObjectStore::new();
        store.insert("0001.png", vec![1u8, 2, 3]);
        store.insert("notes.txt", "hello");

        let data = store.fetch(&"0001.png".into()).await.unwrap();
        assert_eq!(data.bytes, vec![1, 2, 3]);
        assert_eq!(data.mime_type, "image/png");

        assert!(matches!(
            store.fetch(&"missing.png".into()).await,
            Err(ObjectStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.fetch(&"notes.txt".into()).await,
            Err(ObjectStoreError::UnsupportedMedia { .. })
        ));
    }
}
