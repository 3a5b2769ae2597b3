mod queue;
mod regenerate;

pub use queue::{
    JobError, JobId, JobQueue, JobType, JobWorker, MemoryJobQueue, QueueError, QueuedJob,
    WorkerSummary,
};
pub use regenerate::{JobRunner, RegenerateJob, enqueue_regenerate_job};
