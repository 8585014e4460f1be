use async_trait::async_trait;
use chrono::Utc;

use super::{check_transition, JobStore, JobStoreError};
use crate::db::job_repo::{self, JobRow};
use crate::db::{Database, DatabaseError};
use crate::job::{ExtractionJob, ImageRef, JobStatus};

/// [`JobStore`] over the SQLite tables. Each call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, JobStoreError>
    where
        F: FnOnce(&Database) -> Result<T, JobStoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| JobStoreError::Unavailable(format!("database task aborted: {}", e)))?
    }
}

fn load(db: &Database, job_id: &str) -> Result<ExtractionJob, JobStoreError> {
    match job_repo::find_by_id(db, job_id)? {
        Some(row) => Ok(row.into_job()?),
        None => Err(JobStoreError::NotFound(job_id.to_string())),
    }
}

/// Turns a zero-row update into the error explaining why.
fn explain_noop(db: &Database, job_id: &str, next: JobStatus) -> Result<(), JobStoreError> {
    let job = load(db, job_id)?;
    check_transition(&job, next)
}

fn rows(result: Result<Vec<JobRow>, DatabaseError>) -> Result<Vec<ExtractionJob>, JobStoreError> {
    result?
        .into_iter()
        .map(|row| row.into_job().map_err(JobStoreError::from))
        .collect()
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: &ExtractionJob, items: &[ImageRef]) -> Result<(), JobStoreError> {
        let row = JobRow::from_job(job);
        let items: Vec<String> = items.iter().map(|i| i.as_str().to_string()).collect();
        self.blocking(move |db| Ok(job_repo::insert(db, &row, &items)?))
            .await
    }

    async fn get(&self, job_id: &str) -> Result<ExtractionJob, JobStoreError> {
        let job_id = job_id.to_string();
        self.blocking(move |db| load(db, &job_id)).await
    }

    async fn items(&self, job_id: &str) -> Result<Vec<ImageRef>, JobStoreError> {
        let job_id = job_id.to_string();
        self.blocking(move |db| {
            // distinguish "no such job" from "job with no items"
            load(db, &job_id)?;
            let items = job_repo::load_items(db, &job_id)?;
            Ok(items.into_iter().map(ImageRef::from).collect())
        })
        .await
    }

    async fn mark_processing(&self, job_id: &str) -> Result<(), JobStoreError> {
        let job_id = job_id.to_string();
        self.blocking(move |db| {
            let now = job_repo::timestamp(Utc::now());
            if job_repo::mark_processing(db, &job_id, &now)? == 0 {
                return explain_noop(db, &job_id, JobStatus::Processing);
            }
            Ok(())
        })
        .await
    }

    async fn set_progress(&self, job_id: &str, processed: usize) -> Result<(), JobStoreError> {
        let job_id = job_id.to_string();
        self.blocking(move |db| {
            let now = job_repo::timestamp(Utc::now());
            if job_repo::update_progress(db, &job_id, processed as i64, &now)? > 0 {
                return Ok(());
            }

            let job = load(db, &job_id)?;
            if job.status != JobStatus::Processing {
                return Err(JobStoreError::InvalidTransition {
                    job_id,
                    from: job.status,
                    to: JobStatus::Processing,
                });
            }
            if processed > job.total_items {
                return Err(JobStoreError::ProgressOutOfRange {
                    job_id,
                    processed,
                    total: job.total_items,
                });
            }
            // stale value below the stored counter
            Ok(())
        })
        .await
    }

    async fn complete(
        &self,
        job_id: &str,
        output: String,
        note: Option<String>,
    ) -> Result<(), JobStoreError> {
        let job_id = job_id.to_string();
        self.blocking(move |db| {
            let now = job_repo::timestamp(Utc::now());
            if job_repo::complete(db, &job_id, &output, note.as_deref(), &now)? == 0 {
                return explain_noop(db, &job_id, JobStatus::Completed);
            }
            Ok(())
        })
        .await
    }

    async fn fail(&self, job_id: &str, message: String) -> Result<(), JobStoreError> {
        let job_id = job_id.to_string();
        self.blocking(move |db| {
            let now = job_repo::timestamp(Utc::now());
            if job_repo::fail(db, &job_id, &message, &now)? == 0 {
                return explain_noop(db, &job_id, JobStatus::Failed);
            }
            Ok(())
        })
        .await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ExtractionJob>, JobStoreError> {
        let owner_id = owner_id.to_string();
        self.blocking(move |db| rows(job_repo::list_by_owner(db, &owner_id)))
            .await
    }

    async fn list_unfinished(&self) -> Result<Vec<ExtractionJob>, JobStoreError> {
        self.blocking(|db| rows(job_repo::list_unfinished(db))).await
    }
}
