//! Regeneration pipeline.
//!
//! Drives a [`PageGenerator`] over a list of pages, either inline with bounded
//! concurrency and progress reporting, or by handing the list to the job queue.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::{ExecutionMode, GenerateError, GenerationOutcome, GeneratorKind, OutcomeStatus, PageGenerator};
use crate::application::error::error_chain_message;
use crate::application::jobs::{
    JobId, JobQueue, JobRunner, JobWorker, MemoryJobQueue, RegenerateJob, enqueue_regenerate_job,
};
use crate::cache::{DEFAULT_CONCURRENCY, RefreshConfig, clamp_concurrency, rw_read, rw_write};
use crate::domain::site_uri::SiteUri;

const SOURCE: &str = "pagerefresh::pipeline";

/// Called after each attempted page with `(count, total, label)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// Human-readable progress label.
pub fn progress_label(count: usize, total: usize) -> String {
    format!("Generating {count} of {total} pages.")
}

#[derive(Clone)]
pub struct GenerateOptions {
    /// Hand the list to the job queue instead of running inline.
    pub queue: bool,
    /// Maximum in-flight pages for concurrent generators, clamped to `1..=100`.
    pub concurrency: usize,
    /// Wait before the first page is generated.
    pub delay: Option<Duration>,
    pub progress: Option<ProgressCallback>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            queue: false,
            concurrency: DEFAULT_CONCURRENCY,
            delay: None,
            progress: None,
        }
    }
}

impl fmt::Debug for GenerateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerateOptions")
            .field("queue", &self.queue)
            .field("concurrency", &self.concurrency)
            .field("delay", &self.delay)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl GenerateOptions {
    pub fn from_config(config: &RefreshConfig) -> Self {
        Self {
            queue: config.queue,
            concurrency: config.concurrency(),
            delay: config.delay(),
            progress: None,
        }
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(usize, usize, &str) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<GenerationOutcome>,
    /// Set when the run stopped before generating any page.
    pub batch_error: Option<String>,
}

impl RunReport {
    fn record(&mut self, outcome: GenerationOutcome) {
        self.attempted += 1;
        match outcome.status {
            OutcomeStatus::Generated | OutcomeStatus::AlreadyCached => self.succeeded += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
            OutcomeStatus::Failed => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    fn aborted(error: &GenerateError) -> Self {
        Self {
            batch_error: Some(error_chain_message(error)),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed(RunReport),
    Queued(JobId),
    /// A listener vetoed the run.
    Aborted,
    /// Nothing left to generate.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeforeGenerate {
    Proceed(Vec<SiteUri>),
    Abort,
}

/// Hooks around a run.
#[async_trait]
pub trait GenerateListener: Send + Sync {
    /// May rewrite the list or veto the run.
    async fn before_generate(&self, uris: Vec<SiteUri>, _kind: GeneratorKind) -> BeforeGenerate {
        BeforeGenerate::Proceed(uris)
    }

    async fn after_generate(&self, _uris: &[SiteUri], _report: &RunReport) {}
}

struct Executor {
    generators: HashMap<GeneratorKind, Arc<dyn PageGenerator>>,
    listeners: RwLock<Vec<Arc<dyn GenerateListener>>>,
}

impl Executor {
    fn listeners(&self) -> Vec<Arc<dyn GenerateListener>> {
        rw_read(&self.listeners, SOURCE, "listeners").clone()
    }

    async fn execute(
        &self,
        uris: &[SiteUri],
        kind: GeneratorKind,
        options: &GenerateOptions,
    ) -> RunReport {
        let report = self.generate_all(uris, kind, options).await;
        for listener in self.listeners() {
            listener.after_generate(uris, &report).await;
        }
        report
    }

    async fn generate_all(
        &self,
        uris: &[SiteUri],
        kind: GeneratorKind,
        options: &GenerateOptions,
    ) -> RunReport {
        let Some(generator) = self.generators.get(&kind).cloned() else {
            let err = GenerateError::MissingGenerator { kind };
            error!(target: SOURCE, generator = %kind, error = %err, "regeneration aborted");
            return RunReport::aborted(&err);
        };

        if let Some(delay) = options.delay {
            debug!(target: SOURCE, delay_ms = delay.as_millis() as u64, "delaying regeneration");
            tokio::time::sleep(delay).await;
        }

        let started_at = Instant::now();
        if let Err(err) = generator.prepare().await {
            error!(
                target: SOURCE,
                generator = %kind,
                error = %error_chain_message(&err),
                "generator preparation failed"
            );
            return RunReport::aborted(&err);
        }

        let report = match generator.mode() {
            ExecutionMode::Concurrent => concurrent(generator, uris, options).await,
            ExecutionMode::Sequential => sequential(generator.as_ref(), uris, options).await,
        };

        histogram!("pagerefresh_run_ms", "generator" => kind.as_str())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        info!(
            target: SOURCE,
            generator = %kind,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "regeneration complete"
        );
        report
    }
}

#[async_trait]
impl JobRunner for Executor {
    async fn run_regenerate(&self, job: RegenerateJob) -> RunReport {
        self.execute(&job.site_uris, job.generator, &job.options())
            .await
    }
}

async fn concurrent(
    generator: Arc<dyn PageGenerator>,
    uris: &[SiteUri],
    options: &GenerateOptions,
) -> RunReport {
    let total = uris.len();
    let concurrency = clamp_concurrency(options.concurrency);
    let completed = Arc::new(AtomicUsize::new(0));
    let semaphore = Arc::new(Semaphore::new(concurrency));

    let outcomes: Vec<GenerationOutcome> = stream::iter(uris.iter().cloned())
        .map(|uri| {
            let generator = Arc::clone(&generator);
            let semaphore = Arc::clone(&semaphore);
            let completed = Arc::clone(&completed);
            let progress = options.progress.clone();

            async move {
                let _permit = semaphore.acquire().await;
                let outcome = attempt(generator.as_ref(), &uri).await;

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = progress {
                    progress(done, total, &progress_label(done, total));
                }
                outcome
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut report = RunReport::default();
    for outcome in outcomes {
        report.record(outcome);
    }
    report
}

async fn sequential(
    generator: &dyn PageGenerator,
    uris: &[SiteUri],
    options: &GenerateOptions,
) -> RunReport {
    let total = uris.len();
    let mut report = RunReport::default();

    for (index, uri) in uris.iter().enumerate() {
        report.record(attempt(generator, uri).await);
        if let Some(progress) = &options.progress {
            let done = index + 1;
            progress(done, total, &progress_label(done, total));
        }
    }
    report
}

/// Generate one page; errors and panics become a failed outcome.
async fn attempt(generator: &dyn PageGenerator, uri: &SiteUri) -> GenerationOutcome {
    let outcome = match AssertUnwindSafe(generator.generate(uri)).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            warn!(
                target: SOURCE,
                site_uri = %uri,
                status = err.http_status(),
                error = %error_chain_message(&err),
                "page generation failed"
            );
            GenerationOutcome::failed(uri, &err)
        }
        Err(_) => {
            let err = GenerateError::Panicked { uri: uri.clone() };
            error!(target: SOURCE, site_uri = %uri, "page generation panicked");
            GenerationOutcome::failed(uri, &err)
        }
    };

    counter!("pagerefresh_generate_total", "result" => outcome.status.as_str()).increment(1);
    outcome
}

/// Entry point for regenerating a list of pages.
pub struct RegenerationPipeline {
    executor: Arc<Executor>,
    queue: Option<Arc<dyn JobQueue>>,
}

impl RegenerationPipeline {
    pub fn new() -> Self {
        Self {
            executor: Arc::new(Executor {
                generators: HashMap::new(),
                listeners: RwLock::new(Vec::new()),
            }),
            queue: None,
        }
    }

    /// Register a generator under its own [`GeneratorKind`].
    ///
    /// Must be called before the pipeline is shared with a worker.
    pub fn with_generator(mut self, generator: Arc<dyn PageGenerator>) -> Self {
        match Arc::get_mut(&mut self.executor) {
            Some(executor) => {
                executor.generators.insert(generator.kind(), generator);
            }
            None => warn!(
                target: SOURCE,
                generator = %generator.kind(),
                "pipeline already shared, generator ignored"
            ),
        }
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn GenerateListener>) {
        rw_write(&self.executor.listeners, SOURCE, "add_listener").push(listener);
    }

    /// Start a worker that executes jobs from `queue` with this pipeline's generators.
    pub fn spawn_worker(&self, queue: &MemoryJobQueue) -> JobWorker {
        queue.spawn_worker(self.executor.clone())
    }

    pub async fn run(
        &self,
        uris: Vec<SiteUri>,
        kind: GeneratorKind,
        options: GenerateOptions,
    ) -> RunStatus {
        let mut uris = uris;
        for listener in self.executor.listeners() {
            match listener.before_generate(uris, kind).await {
                BeforeGenerate::Proceed(rewritten) => uris = rewritten,
                BeforeGenerate::Abort => {
                    info!(target: SOURCE, generator = %kind, "regeneration vetoed by listener");
                    return RunStatus::Aborted;
                }
            }
        }

        if uris.is_empty() {
            debug!(target: SOURCE, generator = %kind, "nothing to regenerate");
            return RunStatus::Empty;
        }

        if options.queue {
            match &self.queue {
                Some(queue) => {
                    match enqueue_regenerate_job(queue.as_ref(), uris.clone(), kind, &options).await
                    {
                        Ok(job_id) => return RunStatus::Queued(job_id),
                        Err(err) => warn!(
                            target: SOURCE,
                            error = %err,
                            "enqueue failed, regenerating inline"
                        ),
                    }
                }
                None => warn!(target: SOURCE, "no job queue configured, regenerating inline"),
            }
        }

        RunStatus::Completed(self.executor.execute(&uris, kind, &options).await)
    }

    /// Execute a queued job inline, without consulting `before_generate`.
    pub async fn execute(&self, job: RegenerateJob) -> RunReport {
        self.executor.run_regenerate(job).await
    }
}

impl Default for RegenerationPipeline {
    fn default() -> Self {
        Self::new()
    }
}
