use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::assembler::FragmentAssembler;
use crate::job::{Fragment, ImageRef, JobStatus};
use crate::ordering::sort_by_ordering_key;
use crate::recognition::{DriverError, Merger, RecognitionDriver, Recognizer};
use crate::sanitize;
use crate::store::{JobStore, JobStoreError, ObjectStore};

use super::config::PipelineConfig;
use super::error::PipelineError;
use super::progress::{ProgressEvent, ProgressReporter};

/// Why a run stopped before attempting every item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    CircuitBreaker {
        consecutive_failures: u32,
        /// Zero-based position of the failure that tripped the breaker.
        position: usize,
    },
    Cancelled {
        /// First item that was never attempted.
        next_position: usize,
    },
}

impl StopReason {
    fn note(&self, total: usize, not_attempted: usize) -> String {
        match self {
            StopReason::CircuitBreaker {
                consecutive_failures,
                position,
            } => format!(
                "early abort: circuit breaker tripped after {} consecutive recognition failures at item {} of {}; {} item(s) not attempted",
                consecutive_failures,
                position + 1,
                total,
                not_attempted
            ),
            StopReason::Cancelled { next_position } => format!(
                "cancelled by request before item {} of {}; {} item(s) not attempted",
                next_position + 1,
                total,
                not_attempted
            ),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub failed_items: usize,
    pub stop: Option<StopReason>,
}

/// Drives one job through recognition and assembly.
///
/// `run` is the only entry point and holds no per-job state, so one runner
/// can serve every worker of a scheduler.
pub struct ExtractionRunner {
    jobs: Arc<dyn JobStore>,
    driver: RecognitionDriver,
    assembler: FragmentAssembler,
    config: PipelineConfig,
    progress: Arc<dyn ProgressReporter>,
}

struct ItemLoop {
    buffer: Vec<Option<Fragment>>,
    processed: usize,
    failed: usize,
    tripped: Option<StopReason>,
}

impl ExtractionRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        recognizer: Arc<dyn Recognizer>,
        merger: Option<Arc<dyn Merger>>,
        config: PipelineConfig,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        let driver = RecognitionDriver::new(objects, recognizer, config.retry);
        let assembler = FragmentAssembler::new(merger, config.strict_merge);
        Self {
            jobs,
            driver,
            assembler,
            config,
            progress,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs a `PENDING` job to `COMPLETED` or `FAILED`.
    ///
    /// Per-item failures never escape: they become placeholders. Anything
    /// else (storage, assembly) moves the job to `FAILED` with the error
    /// text and is returned to the caller.
    pub async fn run(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let span = info_span!("extraction_job", job_id = %job_id, items = tracing::field::Empty);
        async {
            let result = self.execute(job_id, cancel).await;
            if let Err(e) = &result {
                self.record_failure(job_id, e).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn record_failure(&self, job_id: &str, err: &PipelineError) {
        if !err.fails_job() {
            warn!(error = %err, "job not run");
            return;
        }

        self.fail_job(job_id, err.to_string()).await;
    }

    /// Moves a job to `FAILED` and reports the counts it reached.
    ///
    /// Also used by workers when a run unwinds instead of returning.
    pub async fn fail_job(&self, job_id: &str, message: String) {
        error!(error = %message, "extraction job failed");
        if let Err(write_err) = self.jobs.fail(job_id, message.clone()).await {
            error!(error = %write_err, "could not record job failure");
        }
        let (processed, total) = match self.jobs.get(job_id).await {
            Ok(job) => (job.processed_items, job.total_items),
            Err(_) => (0, 0),
        };
        self.progress.report(
            job_id,
            ProgressEvent::Failed {
                processed,
                total,
                error: message,
            },
        );
    }

    async fn execute(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let job = match self.jobs.get(job_id).await {
            Ok(job) => job,
            Err(JobStoreError::NotFound(id)) => return Err(PipelineError::JobNotFound(id)),
            Err(e) => return Err(e.into()),
        };
        if job.status != JobStatus::Pending {
            return Err(PipelineError::NotRunnable {
                job_id: job.id,
                status: job.status,
            });
        }

        let committed = self.jobs.items(job_id).await?;
        self.jobs.mark_processing(job_id).await?;

        let ordered = sort_by_ordering_key(committed);
        let total = ordered.len();
        tracing::Span::current().record("items", total);
        if total != job.total_items {
            warn!(
                recorded = job.total_items,
                committed = total,
                "item count differs from job record"
            );
        }
        self.progress.report(job_id, ProgressEvent::Started { total });
        info!(total, "extraction started");

        let mut run = self.process_items(job_id, &ordered, cancel).await?;

        let stop = run.tripped.take().or_else(|| {
            run.buffer
                .iter()
                .position(Option::is_none)
                .map(|next_position| StopReason::Cancelled { next_position })
        });
        let note = stop
            .as_ref()
            .map(|reason| reason.note(total, total - run.processed));

        let fragments: Vec<Fragment> = run.buffer.into_iter().flatten().collect();
        let artifact = self.assembler.assemble(&fragments).await?;

        self.jobs
            .complete(job_id, artifact, note.clone())
            .await?;
        self.progress.report(
            job_id,
            ProgressEvent::Completed {
                processed: run.processed,
                total,
                note: note.clone(),
            },
        );

        match &note {
            Some(note) => warn!(processed = run.processed, total, note = %note, "extraction completed early"),
            None => info!(processed = run.processed, failed = run.failed, "extraction completed"),
        }

        Ok(RunOutcome {
            status: JobStatus::Completed,
            total,
            processed: run.processed,
            failed_items: run.failed,
            stop,
        })
    }

    /// Recognizes items in reading order into a position-indexed buffer.
    ///
    /// The breaker and the cancellation token are checked each time the next
    /// item is about to start. With concurrency above one, results arrive in
    /// completion order, which is also the order the breaker counts
    /// failures in. The pause after a success only holds back new items.
    async fn process_items(
        &self,
        job_id: &str,
        ordered: &[ImageRef],
        cancel: &CancellationToken,
    ) -> Result<ItemLoop, PipelineError> {
        let total = ordered.len();
        let concurrency = self.config.item_concurrency.max(1);
        let mut run = ItemLoop {
            buffer: vec![None; total],
            processed: 0,
            failed: 0,
            tripped: None,
        };
        let mut consecutive_failures = 0u32;
        let mut next = 0;
        let mut in_flight = FuturesUnordered::new();
        // new items wait for this instant; running ones keep being polled
        let mut resume_at: Option<Instant> = None;

        loop {
            if cancel.is_cancelled() || resume_at.is_some_and(|at| Instant::now() >= at) {
                resume_at = None;
            }
            if resume_at.is_none() {
                while in_flight.len() < concurrency
                    && next < total
                    && run.tripped.is_none()
                    && !cancel.is_cancelled()
                {
                    in_flight.push(self.recognize_at(next, &ordered[next]));
                    next += 1;
                }
            }

            let finished = match resume_at {
                None => in_flight.next().await,
                Some(at) => tokio::select! {
                    finished = in_flight.next(), if !in_flight.is_empty() => finished,
                    _ = tokio::time::sleep_until(at) => continue,
                    _ = cancel.cancelled() => continue,
                },
            };
            let Some((position, result)) = finished else {
                break;
            };

            let image = ordered[position].clone();
            let fragment = match result {
                Ok(text) => {
                    consecutive_failures = 0;
                    Fragment::recognized(position, image, text)
                }
                Err(DriverError::RecognitionFailed {
                    attempts,
                    last_error,
                }) => {
                    consecutive_failures += 1;
                    run.failed += 1;
                    Fragment::failed(position, image, attempts, last_error)
                }
            };
            let failed = fragment.is_failure();
            run.buffer[position] = Some(fragment);
            run.processed += 1;

            self.jobs.set_progress(job_id, run.processed).await?;
            self.progress.report(
                job_id,
                ProgressEvent::ItemFinished {
                    position,
                    processed: run.processed,
                    total,
                    failed,
                },
            );

            if failed
                && run.tripped.is_none()
                && consecutive_failures >= self.config.failure_threshold
            {
                warn!(position, consecutive_failures, "circuit breaker tripped, stopping");
                run.tripped = Some(StopReason::CircuitBreaker {
                    consecutive_failures,
                    position,
                });
            }

            let more_to_start = next < total && run.tripped.is_none();
            if !failed && more_to_start && !self.config.inter_item_delay.is_zero() {
                resume_at = Some(Instant::now() + self.config.inter_item_delay);
            }
        }

        if cancel.is_cancelled() && run.processed < total {
            debug!(processed = run.processed, total, "run cancelled");
        }
        Ok(run)
    }

    async fn recognize_at(
        &self,
        position: usize,
        image: &ImageRef,
    ) -> (usize, Result<String, DriverError>) {
        let span = info_span!(
            "recognize_item",
            position,
            image = %sanitize::redact_ref(image)
        );
        let result = self.driver.recognize(image).instrument(span).await;
        (position, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_note_wording() {
        let note = StopReason::CircuitBreaker {
            consecutive_failures: 5,
            position: 6,
        }
        .note(10, 3);
        assert_eq!(
            note,
            "early abort: circuit breaker tripped after 5 consecutive recognition failures at item 7 of 10; 3 item(s) not attempted"
        );
    }

    #[test]
    fn test_cancel_note_wording() {
        let note = StopReason::Cancelled { next_position: 2 }.note(4, 2);
        assert_eq!(
            note,
            "cancelled by request before item 3 of 4; 2 item(s) not attempted"
        );
    }
}
