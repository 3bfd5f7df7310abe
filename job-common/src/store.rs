//! In-process job state store with write-through JSON persistence and a
//! background retention sweep.
//!
//! Grounded in `hook-janitor`'s `cleanup_loop`/`Cleaner` pattern for the
//! sweep cadence (a `tokio::time::interval` tick gated by a `Semaphore` of
//! size 1, so a slow sweep never overlaps itself), generalized here from a
//! Postgres row scan to an in-memory map scan since this core has no
//! database. Persistence is reworked from `sqlx`-backed rows into a
//! pluggable `PersistentStore` trait with a JSON-file implementation, since
//! the spec calls for a lightweight restart-survival mechanism rather than a
//! queryable database.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn};

use crate::duration::EnvMsDuration;
use crate::job::{Job, JobFilter, JobId, JobStatus};

#[derive(Envconfig, Clone, Debug)]
pub struct StoreConfig {
    #[envconfig(default = "./data/jobs.json")]
    pub persistence_path: String,

    #[envconfig(default = "5000")]
    pub flush_interval: EnvMsDuration,

    /// Default 24h: how long a terminal job's persisted state survives
    /// before the retention sweep purges it.
    #[envconfig(default = "86400000")]
    pub retention: EnvMsDuration,

    /// Default 1h: how often the retention sweep runs.
    #[envconfig(default = "3600000")]
    pub sweep_interval: EnvMsDuration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persistence_path: "./data/jobs.json".to_owned(),
            flush_interval: EnvMsDuration(std::time::Duration::from_millis(5000)),
            retention: EnvMsDuration(std::time::Duration::from_millis(86_400_000)),
            sweep_interval: EnvMsDuration(std::time::Duration::from_millis(3_600_000)),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read persisted state from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write persisted state to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize job state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable snapshot of every job the store knows about, independent of how
/// it is written to disk.
pub trait PersistentStore: Send + Sync {
    fn load(&self) -> Result<Vec<Job>, StoreError>;
    fn save(&self, jobs: &[Job]) -> Result<(), StoreError>;
}

/// Writes the full job table as one JSON array on every flush. Simple and
/// sufficient at the scale this core targets; a record that fails to parse
/// on load is dropped with a warning rather than failing the whole load, so
/// one corrupted entry can't take the service down on restart.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PersistentStore for JsonFileStore {
    fn load(&self) -> Result<Vec<Job>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.display().to_string(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
        let mut jobs = Vec::with_capacity(records.len());

        for record in records {
            match serde_json::from_value::<Job>(record) {
                Ok(job) => jobs.push(job),
                Err(error) => warn!("dropping corrupted job record on load: {error}"),
            }
        }

        Ok(jobs)
    }

    fn save(&self, jobs: &[Job]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                    path: self.path.display().to_string(),
                    source,
                })?;
            }
        }

        let serialized = serde_json::to_string_pretty(jobs)?;
        std::fs::write(&self.path, serialized).map_err(|source| StoreError::Write {
            path: self.path.display().to_string(),
            source,
        })
    }
}

/// Concurrent job_id -> Job map, the single source of truth every other
/// component reads through.
pub struct StateStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    persistence: Arc<dyn PersistentStore>,
    flush_gate: Semaphore,
}

impl StateStore {
    pub fn new(persistence: Arc<dyn PersistentStore>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            persistence,
            flush_gate: Semaphore::new(1),
        }
    }

    /// Load whatever was last persisted, for use at startup.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let loaded = self.persistence.load()?;
        let count = loaded.len();
        let mut jobs = self.jobs.write().await;
        for job in loaded {
            jobs.insert(job.id, job);
        }
        info!("restored {count} jobs from persisted state");
        Ok(count)
    }

    pub async fn insert(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn list(&self, filter: &JobFilter) -> Vec<Job> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect()
    }

    /// Apply `mutate` to the job identified by `id`, validating the status
    /// transition against `JobStatus::can_transition_to` when `mutate`
    /// changes `status`. Returns `None` if the job doesn't exist or the
    /// transition is illegal; the closure's changes are discarded in that
    /// case.
    pub async fn update<F>(&self, id: JobId, mutate: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id)?;
        let previous_status = job.status;
        let mut candidate = job.clone();
        mutate(&mut candidate);

        if candidate.status != previous_status
            && !previous_status.can_transition_to(candidate.status)
        {
            warn!(
                "rejected illegal job transition {previous_status:?} -> {:?} for {id}",
                candidate.status
            );
            return None;
        }

        candidate.updated_at = Utc::now();
        *job = candidate.clone();
        Some(candidate)
    }

    /// Cancel a job that is still `Pending` or `Retry`. Returns the
    /// cancelled job, or `None` if the job doesn't exist or has already left
    /// either of those states (already running, or already terminal) — a
    /// caller racing a worker that just picked the job up simply loses the
    /// race, the same way any other illegal-transition request is rejected
    /// by [`Self::update`].
    pub async fn cancel(&self, id: JobId) -> Option<Job> {
        self.update(id, |job| job.status = JobStatus::Cancelled).await
    }

    /// Write the current table to the persistence backend. Safe to call
    /// concurrently: a second flush while one is in-flight waits its turn
    /// rather than racing a write.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let _permit = self.flush_gate.acquire().await.expect("semaphore open");
        let snapshot: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        self.persistence.save(&snapshot)
    }

    /// Remove terminal jobs whose `updated_at` is older than `retention`,
    /// returning how many were purged.
    pub async fn purge_older_than(&self, retention: ChronoDuration, now: DateTime<Utc>) -> usize {
        let cutoff = now - retention;
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        before - jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}

/// Repeatedly flush `store` on `flush_interval`. Grounded in
/// `hook-janitor::cleanup_loop`'s `Semaphore`-gated `interval.tick()` pattern.
pub async fn flush_loop(store: Arc<StateStore>, flush_interval: std::time::Duration) {
    let mut interval = tokio::time::interval(flush_interval);
    loop {
        interval.tick().await;
        if let Err(error) = store.flush().await {
            warn!("periodic flush failed: {error}");
        }
    }
}

/// Repeatedly purge terminal jobs older than `retention` every
/// `sweep_interval`. Grounded in the same `cleanup_loop` pattern as
/// [`flush_loop`], on its own cadence.
pub async fn retention_sweep_loop(
    store: Arc<StateStore>,
    retention: ChronoDuration,
    sweep_interval: std::time::Duration,
) {
    let mut interval = tokio::time::interval(sweep_interval);
    loop {
        interval.tick().await;
        let purged = store.purge_older_than(retention, Utc::now()).await;
        if purged > 0 {
            info!("retention sweep purged {purged} terminal jobs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobPayload, JobPriority};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct InMemoryPersistence {
        saved: std::sync::Mutex<Vec<Job>>,
        save_calls: AtomicUsize,
    }

    impl InMemoryPersistence {
        fn new() -> Self {
            Self {
                saved: std::sync::Mutex::new(Vec::new()),
                save_calls: AtomicUsize::new(0),
            }
        }
    }

    impl PersistentStore for InMemoryPersistence {
        fn load(&self) -> Result<Vec<Job>, StoreError> {
            Ok(self.saved.lock().unwrap().clone())
        }

        fn save(&self, jobs: &[Job]) -> Result<(), StoreError> {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            *self.saved.lock().unwrap() = jobs.to_vec();
            Ok(())
        }
    }

    fn sample_job(sequence: u64) -> Job {
        Job::new(
            uuid::Uuid::now_v7(),
            JobKind::Video,
            JobPriority::Medium,
            JobPayload::Video {
                url: "https://example.com/v".to_owned(),
                model: None,
            },
            "client-a".to_owned(),
            sequence,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn insert_get_and_list_round_trip() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = StateStore::new(persistence);
        let job = sample_job(0);
        let id = job.id;

        store.insert(job).await;

        assert!(store.get(id).await.is_some());
        assert_eq!(store.list(&JobFilter::default()).await.len(), 1);
    }

    #[tokio::test]
    async fn update_rejects_illegal_transition() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = StateStore::new(persistence);
        let job = sample_job(0);
        let id = job.id;
        store.insert(job).await;

        // Pending -> Completed is not a legal transition.
        let result = store
            .update(id, |job| job.status = JobStatus::Completed)
            .await;
        assert!(result.is_none());

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn update_allows_legal_transition() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = StateStore::new(persistence);
        let job = sample_job(0);
        let id = job.id;
        store.insert(job).await;

        let result = store
            .update(id, |job| job.status = JobStatus::InProgress)
            .await;
        assert!(result.is_some());
        assert_eq!(result.unwrap().status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn flush_persists_current_snapshot() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = StateStore::new(persistence.clone());
        store.insert(sample_job(0)).await;

        store.flush().await.unwrap();

        assert_eq!(persistence.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_transitions_pending_job_to_cancelled() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = StateStore::new(persistence);
        let job = sample_job(0);
        let id = job.id;
        store.insert(job).await;

        let cancelled = store.cancel(id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_refuses_a_job_already_in_progress() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = StateStore::new(persistence);
        let job = sample_job(0);
        let id = job.id;
        store.insert(job).await;
        store
            .update(id, |job| job.status = JobStatus::InProgress)
            .await
            .unwrap();

        assert!(store.cancel(id).await.is_none());
        assert_eq!(store.get(id).await.unwrap().status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn purge_removes_only_old_terminal_jobs() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = StateStore::new(persistence);

        let mut old_completed = sample_job(0);
        old_completed.status = JobStatus::Completed;
        old_completed.updated_at = Utc::now() - ChronoDuration::days(2);
        let old_id = old_completed.id;

        let mut recent_completed = sample_job(1);
        recent_completed.status = JobStatus::Completed;
        let recent_id = recent_completed.id;

        let mut old_pending = sample_job(2);
        old_pending.updated_at = Utc::now() - ChronoDuration::days(2);
        let pending_id = old_pending.id;

        store.insert(old_completed).await;
        store.insert(recent_completed).await;
        store.insert(old_pending).await;

        let purged = store
            .purge_older_than(ChronoDuration::days(1), Utc::now())
            .await;

        assert_eq!(purged, 1);
        assert!(store.get(old_id).await.is_none());
        assert!(store.get(recent_id).await.is_some());
        // Non-terminal jobs are never purged regardless of age.
        assert!(store.get(pending_id).await.is_some());
    }
}
