pub mod error;
pub mod pool;
pub mod summarizer;

pub use pool::{WorkerConfig, WorkerPool};
pub use summarizer::{ProgressSink, SummarizeContext, SummarizeError, SummarizeOutcome, Summarizer};
