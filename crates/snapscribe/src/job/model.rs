//! Durable state of one batch extraction run.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque reference (path or URL) to one uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment, with any URL query string or fragment removed.
    ///
    /// Both `/` and `\` count as separators so that references recorded on
    /// Windows clients sort the same way as POSIX ones.
    pub fn file_name(&self) -> &str {
        let without_query = self
            .0
            .split(['?', '#'])
            .next()
            .unwrap_or(self.0.as_str());
        without_query
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(without_query)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ImageRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Job lifecycle: `PENDING -> PROCESSING -> {COMPLETED, FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `PENDING -> FAILED` is allowed so that a job which never started
    /// (queue closed, interrupted by a restart) can still terminate.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// The durable record of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionJob {
    pub id: String,
    pub owner_id: String,
    pub label: String,
    pub status: JobStatus,
    /// Fixed at creation.
    pub total_items: usize,
    /// Never decreases and never exceeds `total_items`.
    pub processed_items: usize,
    pub output: Option<String>,
    /// Failure message, or the early-abort note on a partial completion.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set if and only if `status` is terminal.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExtractionJob {
    /// A fresh `PENDING` job for a committed batch of `total_items` images.
    pub fn new(owner_id: &str, label: &str, total_items: usize) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            label: label.to_string(),
            status: JobStatus::Pending,
            total_items,
            processed_items: 0,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.clone(),
            label: self.label.clone(),
            status: self.status,
            total_items: self.total_items,
            processed_items: self.processed_items,
            partial: self.status == JobStatus::Completed && self.error.is_some(),
            output: self.output.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// What a polling client sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub label: String,
    pub status: JobStatus,
    pub total_items: usize,
    pub processed_items: usize,
    /// Completed, but with an abort or cancellation note in `error`.
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_file_name() {
        assert_eq!(ImageRef::from("uploads/u1/0003_z.jpg").file_name(), "0003_z.jpg");
        assert_eq!(ImageRef::from("C:\\shots\\0002.png").file_name(), "0002.png");
        assert_eq!(
            ImageRef::from("https://cdn.example.com/b/7/img_12.png?sig=99#x").file_name(),
            "img_12.png"
        );
        assert_eq!(ImageRef::from("plain.png").file_name(), "plain.png");
    }

    #[test]
    fn test_status_transitions_only_move_forward() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_new_job_is_pending_and_empty() {
        let job = ExtractionJob::new("owner-1", "lecture slides", 12);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_items, 12);
        assert_eq!(job.processed_items, 0);
        assert!(job.output.is_none());
        assert!(job.error.is_none());
        assert!(job.completed_at.is_none());
        assert!(!job.is_finished());
    }

    #[test]
    fn test_snapshot_marks_partial_completion() {
        let mut job = ExtractionJob::new("owner-1", "batch", 3);
        job.status = JobStatus::Completed;
        job.processed_items = 2;
        job.output = Some("fn main() {}".to_string());
        job.error = Some("early abort".to_string());
        job.completed_at = Some(Utc::now());

        let snapshot = job.snapshot();
        assert!(snapshot.partial);

        job.error = None;
        assert!(!job.snapshot().partial);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let job = ExtractionJob::new("owner-1", "batch", 3);
        let json = serde_json::to_value(job.snapshot()).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["totalItems"], 3);
        assert_eq!(json["processedItems"], 0);
        assert!(json.get("output").is_none());
        assert!(json.get("completedAt").is_none());
    }
}
