use thiserror::Error;

use crate::assembler::AssemblyError;
use crate::job::JobStatus;
use crate::store::JobStoreError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Only `PENDING` jobs can be run.
    #[error("Job {job_id} is {status} and cannot be run")]
    NotRunnable { job_id: String, status: JobStatus },

    #[error(transparent)]
    Storage(#[from] JobStoreError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

impl PipelineError {
    /// Whether the job record should be moved to `FAILED` for this error.
    pub fn fails_job(&self) -> bool {
        matches!(
            self,
            PipelineError::Storage(_) | PipelineError::Assembly(_)
        )
    }
}
