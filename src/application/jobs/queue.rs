use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{
        Data, Error as ApalisError, MemoryStorage, MessageQueue, Monitor, WorkerBuilder,
        WorkerFactoryFn,
    },
};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use super::regenerate::{JobRunner, RegenerateJob};

const SOURCE: &str = "pagerefresh::jobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Regenerate,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Regenerate => "regenerate",
        }
    }

    fn worker_name(&self) -> String {
        format!("{}-worker", self.as_str())
    }
}

/// Envelope as it sits in the queue.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: RegenerateJob,
    pub enqueued_at: OffsetDateTime,
}

impl QueuedJob {
    fn regenerate(payload: RegenerateJob) -> Self {
        Self {
            id: JobId::new(),
            job_type: JobType::Regenerate,
            payload,
            enqueued_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {job_id} panicked")]
    Panicked { job_id: JobId },
    #[error("job {job_id} could not start: {message}")]
    Aborted { job_id: JobId, message: String },
}

fn job_failed(err: JobError) -> ApalisError {
    let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: RegenerateJob) -> Result<JobId, QueueError>;
}

/// In-process queue on apalis' in-memory storage.
#[derive(Clone)]
pub struct MemoryJobQueue {
    storage: MemoryStorage<QueuedJob>,
    enqueued: Arc<AtomicUsize>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            storage: MemoryStorage::new(),
            enqueued: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Jobs accepted since the queue was created.
    pub fn enqueued(&self) -> usize {
        self.enqueued.load(Ordering::SeqCst)
    }

    /// Start a worker that takes jobs off this queue one at a time.
    pub fn spawn_worker(&self, runner: Arc<dyn JobRunner>) -> JobWorker {
        let (summary_tx, summary_rx) = watch::channel(WorkerSummary::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let context = WorkerContext {
            runner,
            summary: Arc::new(summary_tx),
        };
        let worker = WorkerBuilder::new(JobType::Regenerate.worker_name())
            .concurrency(1)
            .data(context)
            .backend(self.storage.clone())
            .build_fn(process_regenerate_job);
        let monitor = Monitor::new().register(worker);

        let handle = tokio::spawn(async move {
            let signal = async move {
                let _ = shutdown_rx.await;
                Ok::<(), std::io::Error>(())
            };
            if let Err(err) = monitor.run_with_signal(signal).await {
                error!(target: SOURCE, error = %err, "job monitor stopped");
            }
        });

        JobWorker {
            summary: summary_rx,
            enqueued: Arc::clone(&self.enqueued),
            shutdown: shutdown_tx,
            monitor: handle,
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: RegenerateJob) -> Result<JobId, QueueError> {
        let queued = QueuedJob::regenerate(job);
        let id = queued.id;
        let pages = queued.payload.site_uris.len();
        let generator = queued.payload.generator;

        let mut storage = self.storage.clone();
        storage
            .enqueue(queued)
            .await
            .map_err(|_| QueueError::Closed)?;
        self.enqueued.fetch_add(1, Ordering::SeqCst);

        info!(
            target: SOURCE,
            job_id = %id,
            pages,
            generator = %generator,
            "regenerate job enqueued"
        );
        Ok(id)
    }
}

/// Jobs the worker has finished so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub completed: usize,
    pub failed: usize,
}

impl WorkerSummary {
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

/// Handle to a running worker.
pub struct JobWorker {
    summary: watch::Receiver<WorkerSummary>,
    enqueued: Arc<AtomicUsize>,
    shutdown: oneshot::Sender<()>,
    monitor: JoinHandle<()>,
}

impl JobWorker {
    pub fn summary(&self) -> WorkerSummary {
        *self.summary.borrow()
    }

    /// Wait for every job enqueued so far, then stop the worker.
    pub async fn drain(self) -> WorkerSummary {
        let JobWorker {
            mut summary,
            enqueued,
            shutdown,
            monitor,
        } = self;
        let target = enqueued.load(Ordering::SeqCst);

        let finished = summary
            .wait_for(|current| current.finished() >= target)
            .await
            .map(|current| *current)
            .ok();
        let result = finished.unwrap_or_else(|| *summary.borrow());

        let _ = shutdown.send(());
        if let Err(err) = monitor.await {
            error!(target: SOURCE, error = %err, "job monitor task failed");
        }
        result
    }
}

#[derive(Clone)]
struct WorkerContext {
    runner: Arc<dyn JobRunner>,
    summary: Arc<watch::Sender<WorkerSummary>>,
}

/// Runs one job. A panicking job is logged and counted without stopping the worker.
async fn process_regenerate_job(
    job: QueuedJob,
    context: Data<WorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    let job_id = job.id;
    let queued_ms = (OffsetDateTime::now_utc() - job.enqueued_at).whole_milliseconds() as i64;

    info!(
        target: SOURCE,
        %job_id,
        job_type = job.job_type.as_str(),
        queued_ms,
        description = %job.payload.description(),
        "starting regenerate job"
    );

    let outcome = AssertUnwindSafe(ctx.runner.run_regenerate(job.payload))
        .catch_unwind()
        .await;

    match outcome {
        Ok(report) => match report.batch_error {
            Some(message) => {
                error!(target: SOURCE, %job_id, error = %message, "regenerate job could not start");
                ctx.summary.send_modify(|summary| summary.failed += 1);
                Err(job_failed(JobError::Aborted { job_id, message }))
            }
            None => {
                info!(
                    target: SOURCE,
                    %job_id,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    skipped = report.skipped,
                    "regenerate job completed"
                );
                ctx.summary.send_modify(|summary| summary.completed += 1);
                Ok(())
            }
        },
        Err(_) => {
            error!(target: SOURCE, %job_id, "regenerate job panicked");
            ctx.summary.send_modify(|summary| summary.failed += 1);
            Err(job_failed(JobError::Panicked { job_id }))
        }
    }
}
