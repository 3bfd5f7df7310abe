use thiserror::Error;

/// Errors surfaced by the worker pool's own machinery, distinct from a
/// summarizer's [`crate::summarizer::SummarizeError`], which is expected and
/// classified rather than treated as a pool fault.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("a worker task panicked while processing job {job_id}")]
    WorkerPanicked { job_id: uuid::Uuid },
}
