//! Test doubles and an isolated runner setup.
//!
//! Images are stored with their own file name as content, so the scripted
//! recognizer can tell which image it was handed.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use snapscribe::job::{ExtractionJob, ImageRef};
use snapscribe::pipeline::{
    ExtractionRunner, NoopProgress, PipelineConfig, PipelineError, ProgressReporter, RunOutcome,
};
use snapscribe::recognition::{MergeError, Merger, RecognitionError, Recognizer};
use snapscribe::store::{
    ImageData, JobStore, JobStoreError, MemoryJobStore, MemoryObjectStore, ObjectStore,
};

pub const OWNER: &str = "owner-1";
pub const UPLOAD_PREFIX: &str = "uploads/owner-1/session";

/// What the scripted recognizer returns for an image it has no script for.
pub fn recognized_text(name: &str) -> String {
    format!("// code from {}", name)
}

/// Recognizer driven by per-image scripts.
///
/// Each call for an image pops the next scripted result; once the script is
/// used up, images marked with `fail_always` keep failing and all others
/// succeed with `recognized_text`.
#[derive(Default)]
pub struct ScriptedRecognizer {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, RecognitionError>>>>,
    always_fail: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: &str, results: Vec<Result<String, RecognitionError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), results.into());
    }

    pub fn fail_always(&self, name: &str) {
        self.always_fail.lock().unwrap().insert(name.to_string());
    }

    pub fn delay(&self, name: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(name.to_string(), delay);
    }

    /// File names in call order, one entry per attempt.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, image: &ImageData) -> Result<String, RecognitionError> {
        let name = String::from_utf8_lossy(&image.bytes).into_owned();
        self.calls.lock().unwrap().push(name.clone());

        let delay = self.delays.lock().unwrap().get(&name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(VecDeque::pop_front);
        if let Some(result) = scripted {
            return result;
        }

        if self.always_fail.lock().unwrap().contains(&name) {
            return Err(RecognitionError::Transient(format!(
                "model could not read {}",
                name
            )));
        }
        Ok(recognized_text(&name))
    }
}

/// Merger that records every call and joins its input under a header.
#[derive(Default)]
pub struct RecordingMerger {
    calls: Mutex<Vec<Vec<String>>>,
    fail: bool,
}

impl RecordingMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Merger for RecordingMerger {
    async fn merge(&self, fragments: &[String]) -> Result<String, MergeError> {
        self.calls.lock().unwrap().push(fragments.to_vec());
        if self.fail {
            return Err(MergeError::Failed("merge backend down".to_string()));
        }
        Ok(format!(
            "// merged {} fragments\n{}",
            fragments.len(),
            fragments.join("\n")
        ))
    }
}

/// Job store that cannot persist a completed job.
pub struct CompleteFailsStore {
    inner: MemoryJobStore,
}

impl CompleteFailsStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryJobStore::new(),
        }
    }
}

#[async_trait]
impl JobStore for CompleteFailsStore {
    async fn create(&self, job: &ExtractionJob, items: &[ImageRef]) -> Result<(), JobStoreError> {
        self.inner.create(job, items).await
    }

    async fn get(&self, job_id: &str) -> Result<ExtractionJob, JobStoreError> {
        self.inner.get(job_id).await
    }

    async fn items(&self, job_id: &str) -> Result<Vec<ImageRef>, JobStoreError> {
        self.inner.items(job_id).await
    }

    async fn mark_processing(&self, job_id: &str) -> Result<(), JobStoreError> {
        self.inner.mark_processing(job_id).await
    }

    async fn set_progress(&self, job_id: &str, processed: usize) -> Result<(), JobStoreError> {
        self.inner.set_progress(job_id, processed).await
    }

    async fn complete(
        &self,
        _job_id: &str,
        _output: String,
        _note: Option<String>,
    ) -> Result<(), JobStoreError> {
        Err(JobStoreError::Unavailable("disk full".to_string()))
    }

    async fn fail(&self, job_id: &str, message: String) -> Result<(), JobStoreError> {
        self.inner.fail(job_id, message).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ExtractionJob>, JobStoreError> {
        self.inner.list_by_owner(owner_id).await
    }

    async fn list_unfinished(&self) -> Result<Vec<ExtractionJob>, JobStoreError> {
        self.inner.list_unfinished().await
    }
}

/// Full reference for an uploaded image name.
pub fn upload_ref(name: &str) -> ImageRef {
    ImageRef::new(format!("{}/{}", UPLOAD_PREFIX, name))
}

/// Isolated runner environment.
pub struct TestHarness {
    pub jobs: Arc<dyn JobStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub merger: Option<Arc<RecordingMerger>>,
    pub config: PipelineConfig,
    pub progress: Arc<dyn ProgressReporter>,
}

impl TestHarness {
    /// Memory stores, no merger, no pauses between items or retries.
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(MemoryJobStore::new()),
            objects: Arc::new(MemoryObjectStore::new()),
            recognizer: Arc::new(ScriptedRecognizer::new()),
            merger: None,
            config: PipelineConfig::immediate(),
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_merger(mut self, merger: RecordingMerger) -> Self {
        self.merger = Some(Arc::new(merger));
        self
    }

    pub fn with_jobs(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Stores each image under `UPLOAD_PREFIX` and returns the references
    /// in the given order.
    pub fn upload(&self, names: &[&str]) -> Vec<ImageRef> {
        names
            .iter()
            .map(|name| {
                let image = upload_ref(name);
                self.objects.insert(image.clone(), name.as_bytes().to_vec());
                image
            })
            .collect()
    }

    /// Uploads `names` and commits a `PENDING` job with them in that
    /// arrival order.
    pub async fn create_job(&self, names: &[&str]) -> String {
        let items = self.upload(names);
        let job = ExtractionJob::new(OWNER, "test batch", items.len());
        self.jobs.create(&job, &items).await.unwrap();
        job.id
    }

    pub fn runner(&self) -> ExtractionRunner {
        let merger = self
            .merger
            .as_ref()
            .map(|m| Arc::clone(m) as Arc<dyn Merger>);
        ExtractionRunner::new(
            Arc::clone(&self.jobs),
            Arc::clone(&self.objects) as Arc<dyn ObjectStore>,
            Arc::clone(&self.recognizer) as Arc<dyn Recognizer>,
            merger,
            self.config.clone(),
            Arc::clone(&self.progress),
        )
    }

    /// Runs the job to the end and returns the outcome and the stored record.
    pub async fn run(&self, job_id: &str) -> (Result<RunOutcome, PipelineError>, ExtractionJob) {
        let result = self.runner().run(job_id, &CancellationToken::new()).await;
        let job = self.jobs.get(job_id).await.unwrap();
        (result, job)
    }
}

/// Occurrences of the failure marker in an artifact.
pub fn marker_count(artifact: &str) -> usize {
    artifact
        .matches(snapscribe::job::FAILURE_MARKER_PREFIX)
        .count()
}
