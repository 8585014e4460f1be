use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::pipeline::{ExtractionRunner, PipelineError};

type TokenMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Bounded job queue serviced by a fixed set of worker tasks.
///
/// `submit` waits while the queue is full. Each queued job gets a
/// cancellation token derived from the scheduler's own, so `shutdown`
/// stops in-flight runs before their next item. Jobs still queued at
/// shutdown are left `PENDING`.
pub struct JobScheduler {
    sender: Mutex<Option<mpsc::Sender<String>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    tokens: TokenMap,
    stop: CancellationToken,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

impl JobScheduler {
    /// Starts `worker_count` workers (at least one). Must be called from
    /// inside a tokio runtime.
    pub fn new(runner: Arc<ExtractionRunner>, worker_count: usize, queue_capacity: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::channel::<String>(queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let tokens: TokenMap = Arc::new(Mutex::new(HashMap::new()));
        let stop = CancellationToken::new();
        let queued = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        let workers = (0..worker_count)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    runner: Arc::clone(&runner),
                    receiver: Arc::clone(&receiver),
                    tokens: Arc::clone(&tokens),
                    stop: stop.clone(),
                    queued: Arc::clone(&queued),
                    running: Arc::clone(&running),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!("Started {} extraction workers", worker_count);

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            tokens,
            stop,
            queued,
            running,
        }
    }

    pub async fn submit(&self, job_id: &str) -> Result<(), SchedulerError> {
        let sender = lock(&self.sender).clone().ok_or(SchedulerError::Closed)?;

        lock(&self.tokens).insert(job_id.to_string(), self.stop.child_token());
        self.queued.fetch_add(1, Ordering::SeqCst);

        if sender.send(job_id.to_string()).await.is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            lock(&self.tokens).remove(job_id);
            return Err(SchedulerError::Closed);
        }

        debug!("Queued job {}", job_id);
        Ok(())
    }

    /// Requests cooperative cancellation. Returns `false` when the job is
    /// neither queued nor running here.
    pub fn cancel(&self, job_id: &str) -> bool {
        match lock(&self.tokens).get(job_id) {
            Some(token) => {
                token.cancel();
                info!("Cancellation requested for job {}", job_id);
                true
            }
            None => false,
        }
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Closes the queue, signals every worker and waits for them to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down job scheduler...");
        lock(&self.sender).take();
        self.stop.cancel();

        let workers = std::mem::take(&mut *lock(&self.workers));
        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        let left = self.queued();
        if left > 0 {
            warn!("{} queued job(s) left pending at shutdown", left);
        }
        info!("All workers have stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

struct Worker {
    id: usize,
    runner: Arc<ExtractionRunner>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    tokens: TokenMap,
    stop: CancellationToken,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(self) {
        debug!("Worker {} started", self.id);

        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => None,
                    job_id = receiver.recv() => job_id,
                }
            };
            let Some(job_id) = next else {
                break;
            };
            self.queued.fetch_sub(1, Ordering::SeqCst);

            let token = lock(&self.tokens)
                .get(&job_id)
                .cloned()
                .unwrap_or_else(|| self.stop.child_token());

            self.running.fetch_add(1, Ordering::SeqCst);
            let run = AssertUnwindSafe(self.runner.run(&job_id, &token)).catch_unwind();
            match run.await {
                Ok(Ok(outcome)) => debug!(
                    "Worker {} finished job {}: {}/{} item(s)",
                    self.id, job_id, outcome.processed, outcome.total
                ),
                Ok(Err(PipelineError::NotRunnable { status, .. })) => {
                    debug!("Worker {} skipped job {} in state {}", self.id, job_id, status)
                }
                Ok(Err(e)) => warn!("Worker {} job {} ended with error: {}", self.id, job_id, e),
                Err(payload) => {
                    let message = format!("panicked: {}", panic_message(payload.as_ref()));
                    error!("Worker {} job {} {}", self.id, job_id, message);
                    drop(payload);
                    self.runner.fail_job(&job_id, message).await;
                }
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            lock(&self.tokens).remove(&job_id);
        }

        debug!("Worker {} stopped", self.id);
    }
}
