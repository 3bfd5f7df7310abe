//! The injected `Summarizer` boundary: the worker pool never implements the
//! actual summarization work, only invokes it the same way
//! `hook-worker::worker::WebhookWorker` invokes `send_webhook` — a single
//! callback whose result is classified and turned into a state transition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use job_common::event::Event;
use job_common::job::{JobId, JobPayload};
use job_common::store::StateStore;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use job_events::EventBus;

/// Outcome of a successful summarization: an opaque result artifact handed
/// straight to `Job::result`. The core never inspects its contents.
#[derive(Debug, Clone)]
pub struct SummarizeOutcome {
    pub result: String,
}

/// A summarizer's failure, before classification. The worker pool passes
/// `message` to `job_common::classify::classify`.
#[derive(Debug, Clone)]
pub struct SummarizeError {
    pub message: String,
}

impl SummarizeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Cancellation/deadline context threaded through a summarizer invocation.
/// Wraps a `CancellationToken` derived from the pool's top-level shutdown
/// signal: a summarizer is expected to check `is_cancelled()` at convenient
/// points (e.g. between network calls) and return promptly once it fires.
#[derive(Clone)]
pub struct SummarizeContext {
    token: CancellationToken,
}

impl SummarizeContext {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Reports fractional progress for a running job. Updates are throttled to
/// at most one state write + broadcast per 200 ms per job; calls in between
/// are dropped silently, matching the spec's "at most one event per 200ms
/// per job" bound on event volume.
pub struct ProgressSink {
    job_id: JobId,
    store: Arc<StateStore>,
    bus: Arc<EventBus>,
    last_emit: Mutex<Option<Instant>>,
    throttle: Duration,
}

impl ProgressSink {
    pub fn new(job_id: JobId, store: Arc<StateStore>, bus: Arc<EventBus>, throttle: Duration) -> Self {
        Self {
            job_id,
            store,
            bus,
            last_emit: Mutex::new(None),
            throttle,
        }
    }

    /// Report progress in `[0, 1]`, with an optional human-readable message.
    /// A `force`d call (used for the final 100% update before completion)
    /// bypasses throttling so the terminal state is never dropped.
    pub async fn report(&self, fraction: f64, message: Option<String>) {
        self.report_inner(fraction, message, None, false).await;
    }

    pub async fn report_forced(&self, fraction: f64, message: Option<String>) {
        self.report_inner(fraction, message, None, true).await;
    }

    /// Like [`Self::report`], but tags the emitted `job_progress` event with
    /// `step` — used by playlist expansion to identify which sub-item the
    /// progress belongs to.
    pub async fn report_step(&self, fraction: f64, message: Option<String>, step: String) {
        self.report_inner(fraction, message, Some(step), false).await;
    }

    async fn report_inner(
        &self,
        fraction: f64,
        message: Option<String>,
        step: Option<String>,
        force: bool,
    ) {
        let clamped = fraction.clamp(0.0, 1.0);

        {
            let mut last_emit = self.last_emit.lock().await;
            let now = Instant::now();
            if !force {
                if let Some(last) = *last_emit {
                    if now.duration_since(last) < self.throttle {
                        return;
                    }
                }
            }
            *last_emit = Some(now);
        }

        self.store
            .update(self.job_id, |job| job.progress = clamped)
            .await;

        self.bus
            .publish(Event::job_progress(self.job_id, clamped, message, step))
            .await;
    }
}

/// The pluggable summarization callback. Implementations must be safe to
/// call concurrently from any worker loop and must honour cancellation via
/// `ctx` rather than running unbounded.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        payload: &JobPayload,
        progress: &ProgressSink,
        ctx: &SummarizeContext,
    ) -> Result<SummarizeOutcome, SummarizeError>;
}
