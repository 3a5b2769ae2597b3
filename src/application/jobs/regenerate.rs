use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::application::generate::{GenerateOptions, GeneratorKind, RunReport};
use crate::cache::clamp_concurrency;
use crate::domain::site_uri::SiteUri;

use super::queue::{JobId, JobQueue, QueueError};

/// Queued regeneration of a list of pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerateJob {
    pub site_uris: Vec<SiteUri>,
    pub generator: GeneratorKind,
    pub concurrency: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl RegenerateJob {
    pub fn new(site_uris: Vec<SiteUri>, generator: GeneratorKind, options: &GenerateOptions) -> Self {
        Self {
            site_uris,
            generator,
            concurrency: clamp_concurrency(options.concurrency),
            delay_ms: options
                .delay
                .map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }

    /// Inline options equivalent to this job. Queued runs report no progress.
    pub fn options(&self) -> GenerateOptions {
        GenerateOptions {
            queue: false,
            concurrency: self.concurrency,
            delay: self.delay(),
            progress: None,
        }
    }

    pub fn description(&self) -> String {
        format!(
            "Regenerating {} pages ({})",
            self.site_uris.len(),
            self.generator
        )
    }
}

/// Executes regeneration jobs taken off the queue.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_regenerate(&self, job: RegenerateJob) -> RunReport;
}

/// Enqueue a regeneration job. Fire-and-forget; the caller does not wait.
pub async fn enqueue_regenerate_job(
    queue: &dyn JobQueue,
    site_uris: Vec<SiteUri>,
    generator: GeneratorKind,
    options: &GenerateOptions,
) -> Result<JobId, QueueError> {
    queue
        .enqueue(RegenerateJob::new(site_uris, generator, options))
        .await
}
