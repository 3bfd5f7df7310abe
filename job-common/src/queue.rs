//! A bounded, priority-ordered, blocking job queue with per-client rate
//! limiting.
//!
//! Grounded in `hook_common::pgqueue::PgQueue`'s enqueue/dequeue shape
//! (`NewJob` in, `Job` out, `SKIP LOCKED`-style single-owner semantics), but
//! reworked from a Postgres-backed table into an in-process structure: this
//! core does not do distributed scheduling, so the queue is a `BinaryHeap`
//! behind a `tokio::sync::Mutex` rather than a SQL table. Rate limiting
//! reuses `capture::partition_limits::PartitionLimiter`'s use of
//! `governor::RateLimiter::dashmap` for a keyed, process-local limiter.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::Utc;
use envconfig::Envconfig;
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter as GovernorRateLimiter};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::SubmissionError;
use crate::job::{Job, JobPriority, NewJobRequest};
use crate::store::StateStore;

/// Outcome of a `pop` call.
#[derive(Debug)]
pub enum PopOutcome {
    Job(Job),
    Timeout,
    ShutdownSignal,
}

#[derive(Envconfig, Clone, Debug)]
pub struct QueueConfig {
    #[envconfig(default = "1000")]
    pub queue_max: usize,

    #[envconfig(default = "60")]
    pub rate_limit_per_client_per_min: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_max: 1000,
            rate_limit_per_client_per_min: 60,
        }
    }
}

/// Wraps a `Job` in the heap so ordering is `(priority asc, sequence asc)`:
/// higher-priority jobs first, FIFO within a priority. `BinaryHeap` is a
/// max-heap, so `Ord` is inverted relative to natural `JobPriority` order.
struct HeapEntry(Job);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.sequence == other.0.sequence
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse priority (High=1 should sort greatest) then reverse
        // sequence (earlier sequence should sort greatest), since BinaryHeap
        // pops the maximum element.
        other
            .0
            .priority
            .cmp(&self.0.priority)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type KeyedLimiter = GovernorRateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// A bounded, thread-safe priority queue of [`Job`]s with per-`client_id`
/// rate limiting.
pub struct PriorityQueue {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    notify: Notify,
    capacity: usize,
    sequence: AtomicU64,
    limiter: KeyedLimiter,
    draining: std::sync::atomic::AtomicBool,
}

impl PriorityQueue {
    pub fn new(config: &QueueConfig) -> Self {
        let per_min = NonZeroU32::new(config.rate_limit_per_client_per_min.max(1))
            .expect("rate_limit_per_client_per_min must be positive");
        let quota = Quota::per_minute(per_min);

        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            capacity: config.queue_max,
            sequence: AtomicU64::new(0),
            limiter: GovernorRateLimiter::dashmap(quota),
            draining: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Submit a new job request. Rejects with `QueueFull` if at capacity, or
    /// `RateLimited` if the client has exceeded its submission rate.
    ///
    /// Takes `store` so the job is durably visible *before* it is pushed onto
    /// the heap and workers are notified: a worker that pops the job and
    /// transitions it `Pending -> InProgress` must always find a record
    /// already there, never race the caller's own post-submit insert.
    pub async fn submit(
        &self,
        request: NewJobRequest,
        store: &StateStore,
    ) -> Result<Job, SubmissionError> {
        if self.draining.load(AtomicOrdering::Acquire) {
            return Err(SubmissionError::Shutdown);
        }

        if request.payload.validate().is_err() {
            return Err(SubmissionError::InvalidPayload);
        }

        if self.limiter.check_key(&request.client_id).is_err() {
            return Err(SubmissionError::RateLimited);
        }

        let mut heap = self.heap.lock().await;
        if heap.len() >= self.capacity {
            return Err(SubmissionError::QueueFull);
        }

        let sequence = self.sequence.fetch_add(1, AtomicOrdering::SeqCst);
        let job = Job::new(
            Uuid::now_v7(),
            request.payload.kind(),
            request.priority,
            request.payload,
            request.client_id,
            sequence,
            Utc::now(),
        );

        store.insert(job.clone()).await;
        heap.push(HeapEntry(job.clone()));
        drop(heap);
        self.notify.notify_one();

        Ok(job)
    }

    /// Pop the highest-priority, earliest-submitted job. Blocks until a job
    /// is available, `timeout` elapses, or the queue starts draining.
    pub async fn pop(&self, timeout: Duration) -> PopOutcome {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(job) = self.try_pop().await {
                return PopOutcome::Job(job);
            }

            if self.draining.load(AtomicOrdering::Acquire) {
                return PopOutcome::ShutdownSignal;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return PopOutcome::Timeout;
            }

            let wait = deadline - now;
            if tokio::time::timeout(wait, self.notify.notified())
                .await
                .is_err()
            {
                return PopOutcome::Timeout;
            }
        }
    }

    async fn try_pop(&self) -> Option<Job> {
        let mut heap = self.heap.lock().await;
        heap.pop().map(|entry| entry.0)
    }

    /// Re-enqueue a job that is being retried, preserving its original
    /// priority and a fresh submission sequence (so it is serviced FIFO
    /// among jobs of the same priority from the point it re-enters the
    /// queue, not from its original submission time).
    pub async fn requeue(&self, mut job: Job) {
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::SeqCst);
        job.sequence = sequence;
        let mut heap = self.heap.lock().await;
        heap.push(HeapEntry(job));
        drop(heap);
        self.notify.notify_one();
    }

    pub async fn size(&self) -> usize {
        self.heap.lock().await.len()
    }

    /// Stop accepting submissions and drain all pending jobs, returning how
    /// many were discarded from the queue. Jobs already popped by a worker
    /// are unaffected; they remain `Pending`/`InProgress` in the state store.
    pub async fn drain(&self) -> usize {
        self.draining.store(true, AtomicOrdering::Release);
        self.notify.notify_waiters();
        let mut heap = self.heap.lock().await;
        let count = heap.len();
        heap.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPayload;
    use crate::store::{PersistentStore, StoreError};

    struct NullPersistence;

    impl PersistentStore for NullPersistence {
        fn load(&self) -> Result<Vec<Job>, StoreError> {
            Ok(Vec::new())
        }

        fn save(&self, _jobs: &[Job]) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn test_store() -> StateStore {
        StateStore::new(std::sync::Arc::new(NullPersistence))
    }

    fn video_request(client_id: &str, priority: JobPriority) -> NewJobRequest {
        NewJobRequest {
            kind: crate::job::JobKind::Video,
            payload: JobPayload::Video {
                url: "https://example.com/v".to_owned(),
                model: None,
            },
            priority,
            client_id: client_id.to_owned(),
        }
    }

    #[tokio::test]
    async fn pops_highest_priority_first() {
        let queue = PriorityQueue::new(&QueueConfig::default());
        let store = test_store();

        queue
            .submit(video_request("c1", JobPriority::Low), &store)
            .await
            .unwrap();
        queue
            .submit(video_request("c1", JobPriority::Low), &store)
            .await
            .unwrap();
        queue
            .submit(video_request("c1", JobPriority::High), &store)
            .await
            .unwrap();

        let popped = queue.pop(Duration::from_millis(100)).await;
        match popped {
            PopOutcome::Job(job) => assert_eq!(job.priority, JobPriority::High),
            other => panic!("expected a job, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let queue = PriorityQueue::new(&QueueConfig::default());
        let store = test_store();

        let first = queue
            .submit(video_request("c1", JobPriority::Medium), &store)
            .await
            .unwrap();
        let second = queue
            .submit(video_request("c1", JobPriority::Medium), &store)
            .await
            .unwrap();

        let popped_first = queue.pop(Duration::from_millis(100)).await;
        let popped_second = queue.pop(Duration::from_millis(100)).await;

        match (popped_first, popped_second) {
            (PopOutcome::Job(a), PopOutcome::Job(b)) => {
                assert_eq!(a.id, first.id);
                assert_eq!(b.id, second.id);
            }
            _ => panic!("expected two jobs"),
        }
    }

    #[tokio::test]
    async fn rejects_when_at_capacity() {
        let config = QueueConfig {
            queue_max: 1,
            ..QueueConfig::default()
        };
        let queue = PriorityQueue::new(&config);
        let store = test_store();

        queue
            .submit(video_request("c1", JobPriority::Medium), &store)
            .await
            .unwrap();
        let result = queue
            .submit(video_request("c1", JobPriority::Medium), &store)
            .await;
        assert_eq!(result.unwrap_err(), SubmissionError::QueueFull);

        // Pop frees a slot; the next submit succeeds.
        queue.pop(Duration::from_millis(100)).await;
        let result = queue
            .submit(video_request("c1", JobPriority::Medium), &store)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn pop_times_out_when_empty() {
        let queue = PriorityQueue::new(&QueueConfig::default());
        let result = queue.pop(Duration::from_millis(20)).await;
        assert!(matches!(result, PopOutcome::Timeout));
    }

    #[tokio::test]
    async fn drain_rejects_further_submissions() {
        let queue = PriorityQueue::new(&QueueConfig::default());
        let store = test_store();
        queue
            .submit(video_request("c1", JobPriority::Medium), &store)
            .await
            .unwrap();

        let drained = queue.drain().await;
        assert_eq!(drained, 1);

        let result = queue
            .submit(video_request("c1", JobPriority::Medium), &store)
            .await;
        assert_eq!(result.unwrap_err(), SubmissionError::Shutdown);
    }

    #[tokio::test]
    async fn rejects_invalid_payload_before_counting_against_rate_limit() {
        let queue = PriorityQueue::new(&QueueConfig::default());
        let store = test_store();
        let request = NewJobRequest {
            kind: crate::job::JobKind::Video,
            payload: crate::job::JobPayload::Video {
                url: String::new(),
                model: None,
            },
            priority: JobPriority::Medium,
            client_id: "c1".to_owned(),
        };

        let result = queue.submit(request, &store).await;
        assert_eq!(result.unwrap_err(), SubmissionError::InvalidPayload);
        assert_eq!(queue.size().await, 0);
    }
}
