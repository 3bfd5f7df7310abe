//! The worker pool: a fixed set of loops pulling from the priority queue,
//! invoking the injected [`Summarizer`], and driving the job state machine.
//!
//! Grounded in `hook-worker::worker::WebhookWorker`: the `wait_for_job`
//! pattern of ticking a liveness handle on every poll attempt, and
//! `process_webhook_job`'s match over a classified failure to decide
//! complete/retry/fail. Reworked from a semaphore-gated pool of concurrent
//! in-flight jobs (the teacher lets `max_concurrent_jobs` jobs run at once
//! off one or more poller tasks) into `worker_count` dedicated loop tasks,
//! one job at a time each, since the spec calls for a fixed set of worker
//! loops rather than a concurrency-limited fan-out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use envconfig::Envconfig;
use health::HealthRegistry;
use job_common::classify::classify;
use job_common::duration::EnvMsDuration;
use job_common::job::{Job, JobKind, JobPayload, JobStatus, LastError};
use job_common::queue::{PopOutcome, PriorityQueue};
use job_common::retry::{RetryPolicy, RetryPolicyConfig};
use job_common::store::StateStore;
use job_common::{metrics, classify::RetryDecision};
use job_events::EventBus;
use job_common::event::{Event, ResultSource};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::WorkerError;
use crate::summarizer::{ProgressSink, SummarizeContext, SummarizeError, Summarizer};

#[derive(Envconfig, Clone, Debug)]
pub struct WorkerConfig {
    #[envconfig(default = "3")]
    pub worker_count: usize,

    #[envconfig(default = "200")]
    pub progress_throttle_interval: EnvMsDuration,

    #[envconfig(default = "1000")]
    pub playlist_item_pacing: EnvMsDuration,

    #[envconfig(default = "1000")]
    pub pop_poll_interval: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub shutdown_grace_period: EnvMsDuration,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            progress_throttle_interval: EnvMsDuration(Duration::from_millis(200)),
            playlist_item_pacing: EnvMsDuration(Duration::from_millis(1000)),
            pop_poll_interval: EnvMsDuration(Duration::from_millis(1000)),
            shutdown_grace_period: EnvMsDuration(Duration::from_millis(30_000)),
            retry_policy: RetryPolicyConfig::default(),
        }
    }
}

pub struct WorkerPool {
    config: WorkerConfig,
    queue: Arc<PriorityQueue>,
    store: Arc<StateStore>,
    bus: Arc<EventBus>,
    summarizer: Arc<dyn Summarizer>,
    retry_policy: RetryPolicy,
    shutdown: CancellationToken,
    busy: std::sync::atomic::AtomicUsize,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<PriorityQueue>,
        store: Arc<StateStore>,
        bus: Arc<EventBus>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let retry_policy = config.retry_policy.build();
        Self {
            config,
            queue,
            store,
            bus,
            summarizer,
            retry_policy,
            shutdown: CancellationToken::new(),
            busy: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Report the fraction of workers currently processing a job, as a
    /// percentage of `worker_count`.
    fn report_saturation(&self, busy: usize) {
        let percent = if self.config.worker_count == 0 {
            0.0
        } else {
            100.0 * busy as f64 / self.config.worker_count as f64
        };
        metrics::set_worker_saturation_percent(percent);
    }

    /// Spawn `worker_count` loop tasks and a liveness-registered status per
    /// worker, matching `hook-worker`'s `wait_for_job` convention of ticking
    /// a `HealthHandle` on every poll attempt.
    pub async fn run(self: Arc<Self>, health: &HealthRegistry) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.worker_count);

        for index in 0..self.config.worker_count {
            let component = format!("worker-{index}");
            let liveness = health
                .register(component, self.config.pop_poll_interval.as_duration() * 5)
                .await;
            let pool = self.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(index, liveness).await;
            }));
        }

        handles
    }

    /// Signal every worker loop to stop picking up new jobs. Workers finish
    /// their current job (bounded by `shutdown_grace_period`), then the
    /// queue is drained and the store flushed by the caller.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn worker_loop(&self, index: usize, liveness: health::HealthHandle) {
        let poll_interval = self.config.pop_poll_interval.as_duration();

        loop {
            liveness.report_healthy().await;

            if self.shutdown.is_cancelled() {
                let drained = self.queue.drain().await;
                info!("worker {index} observed shutdown, drained {drained} pending jobs");
                return;
            }

            match self.queue.pop(poll_interval).await {
                PopOutcome::Job(job) => {
                    self.process_job(job).await;
                }
                PopOutcome::Timeout => continue,
                PopOutcome::ShutdownSignal => {
                    info!("worker {index} received shutdown signal from queue");
                    return;
                }
            }
        }
    }

    async fn process_job(&self, job: Job) {
        let job_id = job.id;
        let kind = job.kind;

        let Some(in_progress) = self
            .store
            .update(job_id, |job| job.status = JobStatus::InProgress)
            .await
        else {
            warn!("dropping job {job_id}: illegal Pending->InProgress transition");
            return;
        };

        let busy = self.busy.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        self.report_saturation(busy);

        self.bus.publish(Event::job_started(job_id)).await;
        metrics::set_queue_depth(self.queue.size().await);

        let started_at = Utc::now();
        let sink = Arc::new(ProgressSink::new(
            job_id,
            self.store.clone(),
            self.bus.clone(),
            self.config.progress_throttle_interval.as_duration(),
        ));
        let ctx = SummarizeContext::new(self.shutdown.clone());

        let outcome = self
            .run_summarize_supervised(&in_progress, sink.clone(), ctx)
            .await;

        match outcome {
            Ok(result) => {
                sink.report_forced(1.0, None).await;
                self.store
                    .update(job_id, |job| {
                        job.status = JobStatus::Completed;
                        job.progress = 1.0;
                        job.result = Some(result.result.clone());
                    })
                    .await;
                self.bus
                    .publish(Event::job_complete(
                        job_id,
                        result.result.chars().take(280).collect(),
                        None,
                        ResultSource::Generated,
                    ))
                    .await;
                let elapsed = (Utc::now() - started_at).num_milliseconds().max(0) as f64 / 1000.0;
                metrics::record_job_completed(&kind.to_string(), elapsed);
            }
            Err(error) => self.handle_failure(&in_progress, error).await,
        }

        let busy = self.busy.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) - 1;
        self.report_saturation(busy);
    }

    /// Runs the injected summarizer (or playlist expansion) on its own
    /// `tokio` task so that a panicking `Summarizer` implementation is
    /// isolated to that task rather than unwinding the worker loop itself.
    /// A panic is reported as [`WorkerError::WorkerPanicked`] and surfaces to
    /// the job as a retriable internal failure.
    async fn run_summarize_supervised(
        &self,
        job: &Job,
        sink: Arc<ProgressSink>,
        ctx: SummarizeContext,
    ) -> Result<crate::summarizer::SummarizeOutcome, SummarizeError> {
        let job_id = job.id;
        let kind = job.kind;
        let payload = job.payload.clone();
        let summarizer = self.summarizer.clone();
        let pacing = self.config.playlist_item_pacing.as_duration();

        let handle = tokio::spawn(async move {
            match kind {
                JobKind::Playlist => run_playlist(summarizer.as_ref(), &payload, &sink, &ctx, pacing).await,
                JobKind::Video | JobKind::Batch => summarizer.summarize(&payload, &sink, &ctx).await,
            }
        });

        match handle.await {
            Ok(result) => result,
            Err(join_error) => {
                error!("{}", WorkerError::WorkerPanicked { job_id });
                Err(SummarizeError::new(format!(
                    "worker task panicked: {join_error}"
                )))
            }
        }
    }

    async fn handle_failure(&self, job: &Job, error: SummarizeError) {
        let job_id = job.id;
        let classification = classify(&error.message);
        let next_attempt = job.attempt + 1;
        let decision = self.retry_policy.decide(classification, next_attempt);

        let last_error = LastError {
            category: classification.category,
            message: error.message.clone(),
            retriable: classification.retriable,
            occurred_at: Utc::now(),
        };

        match decision {
            RetryDecision::Retry(delay) => {
                self.store
                    .update(job_id, |job| {
                        job.attempt = next_attempt;
                        job.status = JobStatus::Retry;
                        job.last_error = Some(last_error.clone());
                    })
                    .await;
                self.bus
                    .publish(Event::job_retry(job_id, next_attempt, Some(error.message.clone())))
                    .await;
                metrics::record_job_retried(&job.kind.to_string());

                let store = self.store.clone();
                let queue = self.queue.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(requeued) = store
                        .update(job_id, |job| job.status = JobStatus::Pending)
                        .await
                    {
                        queue.requeue(requeued).await;
                    }
                });
            }
            RetryDecision::GiveUp => {
                // Only bump `attempt` when we gave up because retries were
                // exhausted (the job already went through `next_attempt - 1`
                // retries); a category that was never retriable in the first
                // place fails on the attempt it arrived on.
                let retriable = classification.retriable;
                self.store
                    .update(job_id, |job| {
                        if retriable {
                            job.attempt = next_attempt;
                        }
                        job.status = JobStatus::Failed;
                        job.last_error = Some(last_error.clone());
                    })
                    .await;
                self.bus
                    .publish(Event::job_failed(
                        job_id,
                        classification.category,
                        error.message.clone(),
                    ))
                    .await;
                metrics::record_job_failed(&job.kind.to_string(), classification.category);
            }
        }
    }

}

/// Expand a playlist job into a sequence of video sub-operations processed
/// one at a time, with a mandatory pacing delay between items. Sub-progress
/// from each item is mapped onto the parent job's `[0, 1]` range. A free
/// function rather than a `WorkerPool` method so it can run on the
/// panic-isolating task spawned by [`WorkerPool::run_summarize_supervised`].
async fn run_playlist(
    summarizer: &dyn Summarizer,
    payload: &JobPayload,
    sink: &ProgressSink,
    ctx: &SummarizeContext,
    pacing: Duration,
) -> Result<crate::summarizer::SummarizeOutcome, SummarizeError> {
    let JobPayload::Playlist {
        video_urls, model, ..
    } = payload
    else {
        return Err(SummarizeError::new("run_playlist called on a non-playlist payload"));
    };

    if video_urls.is_empty() {
        return Err(SummarizeError::new("playlist has no videos to summarize"));
    }

    let total = video_urls.len();
    let mut summaries = Vec::with_capacity(total);

    for (index, url) in video_urls.iter().enumerate() {
        if ctx.is_cancelled() {
            return Err(SummarizeError::new("playlist cancelled before completion"));
        }

        let item_payload = JobPayload::Video {
            url: url.clone(),
            model: model.clone(),
        };

        let step = format!("{}/{total}", index + 1);
        sink.report_step(index as f64 / total as f64, None, step)
            .await;

        let outcome = summarizer.summarize(&item_payload, sink, ctx).await?;
        summaries.push(outcome.result);

        if index + 1 < total {
            tokio::time::sleep(pacing).await;
        }
    }

    Ok(crate::summarizer::SummarizeOutcome {
        result: summaries.join("\n\n"),
    })
}
