//! The service surface: chunked ingestion in, polled job records out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::db::Database;
use crate::error::{ConfigError, Result, SnapscribeError};
use crate::ingest::{ChunkReceipt, SessionStore, SessionToken};
use crate::job::{ExtractionJob, ImageRef, JobSnapshot};
use crate::pipeline::{
    ExtractionRunner, JobProgressBroadcaster, JobProgressEvent, PipelineConfig, ProgressReporter,
};
use crate::recognition::{Merger, Recognizer, VisionClient, VisionClientSettings};
use crate::sanitize;
use crate::secrets::resolve_secret_optional;
use crate::store::{
    FilesystemObjectStore, JobStore, JobStoreError, ObjectStore, SqliteJobStore,
};
use crate::worker::JobScheduler;

/// Error recorded on jobs found unfinished at startup.
pub const INTERRUPTED_MESSAGE: &str = "interrupted: the service stopped before this job finished";

const DEFAULT_PROGRESS_CAPACITY: usize = 256;

pub struct BatchService {
    sessions: SessionStore,
    jobs: Arc<dyn JobStore>,
    scheduler: JobScheduler,
    progress: JobProgressBroadcaster,
}

pub struct BatchServiceBuilder {
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    recognizer: Arc<dyn Recognizer>,
    merger: Option<Arc<dyn Merger>>,
    pipeline: PipelineConfig,
    uploads_root: String,
    session_idle: Duration,
    max_sessions: u64,
    worker_count: usize,
    queue_capacity: usize,
}

impl BatchServiceBuilder {
    pub fn merger(mut self, merger: Arc<dyn Merger>) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn uploads_root(mut self, root: impl Into<String>) -> Self {
        self.uploads_root = root.into();
        self
    }

    pub fn session_idle(mut self, idle: Duration) -> Self {
        self.session_idle = idle;
        self
    }

    pub fn max_sessions(mut self, max: u64) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Starts the worker tasks; needs a running tokio runtime.
    pub fn build(self) -> BatchService {
        let progress = JobProgressBroadcaster::new(DEFAULT_PROGRESS_CAPACITY);
        let reporter: Arc<dyn ProgressReporter> = Arc::new(progress.clone());
        let runner = Arc::new(ExtractionRunner::new(
            Arc::clone(&self.jobs),
            self.objects,
            self.recognizer,
            self.merger,
            self.pipeline,
            reporter,
        ));
        let scheduler = JobScheduler::new(runner, self.worker_count, self.queue_capacity);

        BatchService {
            sessions: SessionStore::new(self.uploads_root, self.session_idle, self.max_sessions),
            jobs: self.jobs,
            scheduler,
            progress,
        }
    }
}

impl BatchService {
    pub fn builder(
        jobs: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        recognizer: Arc<dyn Recognizer>,
    ) -> BatchServiceBuilder {
        let defaults = ServiceConfig::default();
        BatchServiceBuilder {
            jobs,
            objects,
            recognizer,
            merger: None,
            pipeline: PipelineConfig::default(),
            uploads_root: defaults.uploads_root,
            session_idle: Duration::from_secs(defaults.session_idle_secs),
            max_sessions: defaults.max_sessions,
            worker_count: defaults.worker_count,
            queue_capacity: defaults.queue_capacity,
        }
    }

    /// Wires the production collaborators: SQLite job records, uploads on
    /// the local filesystem and the HTTP vision client.
    ///
    /// Without a configured API key the client talks to the endpoint
    /// unauthenticated and no merge pass is run.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let db_path = config.database_path().ok_or_else(|| ConfigError::Validation {
            message: "databasePath is not set and no home directory was found".to_string(),
        })?;
        let db = Database::open(&db_path)?;
        let jobs: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db));

        let objects: Arc<dyn ObjectStore> =
            Arc::new(FilesystemObjectStore::new(&config.uploads_root));

        let recognition = &config.recognition;
        let api_key = resolve_secret_optional(recognition.api_key_source())?;
        let has_key = api_key.is_some();
        let client = Arc::new(
            VisionClient::new(VisionClientSettings {
                endpoint: recognition.endpoint.clone(),
                model: recognition.model.clone(),
                merge_model: recognition.merge_model().to_string(),
                api_key,
                request_timeout: Duration::from_secs(recognition.request_timeout_secs),
                max_tokens: recognition.max_tokens,
            })
            .map_err(|e| SnapscribeError::Client(e.to_string()))?,
        );

        info!(
            endpoint = %sanitize::redact_endpoint(&recognition.endpoint),
            model = %recognition.model,
            database = %db_path.display(),
            merge = has_key,
            "batch service configured"
        );
        if !has_key {
            warn!("no recognition API key configured; fragments will be concatenated without a merge pass");
        }

        let mut builder = Self::builder(jobs, objects, Arc::clone(&client) as Arc<dyn Recognizer>)
            .pipeline(PipelineConfig::from_config(config))
            .uploads_root(config.uploads_root.clone())
            .session_idle(Duration::from_secs(config.session_idle_secs))
            .max_sessions(config.max_sessions)
            .workers(config.worker_count)
            .queue_capacity(config.queue_capacity);
        if has_key {
            builder = builder.merger(client);
        }
        Ok(builder.build())
    }

    pub fn open_ingestion(
        &self,
        owner_id: &str,
        label: &str,
        expected_total: usize,
    ) -> Result<SessionToken> {
        Ok(self.sessions.open(owner_id, label, expected_total)?)
    }

    /// Where the caller should put the image files of this session.
    pub fn storage_prefix(&self, token: &SessionToken) -> Result<String> {
        Ok(self.sessions.storage_prefix(token)?)
    }

    pub fn append_chunk(
        &self,
        token: &SessionToken,
        references: Vec<ImageRef>,
        chunk_index: u32,
    ) -> Result<ChunkReceipt> {
        Ok(self.sessions.append(token, references, chunk_index)?)
    }

    /// Turns the session into a `PENDING` job and queues it. Returns as
    /// soon as the job is queued.
    pub async fn finalize_ingestion(&self, token: &SessionToken) -> Result<String> {
        let batch = self.sessions.finalize(token)?;
        let job = ExtractionJob::new(&batch.owner_id, &batch.label, batch.items.len());
        self.jobs.create(&job, &batch.items).await?;

        if let Err(e) = self.scheduler.submit(&job.id).await {
            error!(job_id = %job.id, error = %e, "could not queue job");
            if let Err(write_err) = self.jobs.fail(&job.id, e.to_string()).await {
                error!(job_id = %job.id, error = %write_err, "could not record queueing failure");
            }
            return Err(e.into());
        }

        info!(job_id = %job.id, items = job.total_items, "job queued");
        Ok(job.id)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<JobSnapshot> {
        match self.jobs.get(job_id).await {
            Ok(job) => Ok(job.snapshot()),
            Err(JobStoreError::NotFound(id)) => Err(SnapscribeError::JobNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Newest first.
    pub async fn list_jobs(&self, owner_id: &str) -> Result<Vec<JobSnapshot>> {
        let jobs = self.jobs.list_by_owner(owner_id).await?;
        Ok(jobs.iter().map(ExtractionJob::snapshot).collect())
    }

    /// Asks a queued or running job to stop before its next item. `false`
    /// when the job exists but is no longer active.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        if self.scheduler.cancel(job_id) {
            return Ok(true);
        }
        self.get_job(job_id).await?;
        Ok(false)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.progress.subscribe()
    }

    /// Fails every job left `PENDING` or `PROCESSING` by a previous process.
    /// Call once at startup, before accepting uploads.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let unfinished = self.jobs.list_unfinished().await?;
        let mut recovered = 0;
        for job in unfinished {
            match self.jobs.fail(&job.id, INTERRUPTED_MESSAGE.to_string()).await {
                Ok(()) => recovered += 1,
                Err(e) => warn!(job_id = %job.id, error = %e, "could not mark job as interrupted"),
            }
        }
        if recovered > 0 {
            info!(recovered, "marked interrupted jobs as failed");
        }
        Ok(recovered)
    }

    pub fn active_sessions(&self) -> u64 {
        self.sessions.len()
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
