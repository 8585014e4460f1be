//! Live progress, pushed alongside the polled job record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::JobStatus;

/// What the runner reports while a job moves through its states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started {
        total: usize,
    },
    ItemFinished {
        position: usize,
        processed: usize,
        total: usize,
        failed: bool,
    },
    Completed {
        processed: usize,
        total: usize,
        note: Option<String>,
    },
    Failed {
        processed: usize,
        total: usize,
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, job_id: &str, event: ProgressEvent);
}

pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _job_id: &str, _event: ProgressEvent) {}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub processed_items: usize,
    pub total_items: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    fn from_progress(job_id: &str, event: ProgressEvent) -> Self {
        let (status, processed_items, total_items, message, error) = match event {
            ProgressEvent::Started { total } => (
                JobStatus::Processing,
                0,
                total,
                format!("Recognizing {} image(s)", total),
                None,
            ),
            ProgressEvent::ItemFinished {
                position,
                processed,
                total,
                failed,
            } => (
                JobStatus::Processing,
                processed,
                total,
                if failed {
                    format!("Image {} could not be recognized", position + 1)
                } else {
                    format!("Image {} recognized", position + 1)
                },
                None,
            ),
            ProgressEvent::Completed {
                processed,
                total,
                note,
            } => (
                JobStatus::Completed,
                processed,
                total,
                "Extraction completed".to_string(),
                note,
            ),
            ProgressEvent::Failed {
                processed,
                total,
                error,
            } => (
                JobStatus::Failed,
                processed,
                total,
                "Extraction failed".to_string(),
                Some(error),
            ),
        };

        Self {
            job_id: job_id.to_string(),
            status,
            processed_items,
            total_items,
            message,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Fans job progress out to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressReporter for JobProgressBroadcaster {
    fn report(&self, job_id: &str, event: ProgressEvent) {
        self.send(JobProgressEvent::from_progress(job_id, event));
    }
}
