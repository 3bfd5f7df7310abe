//! The Job value types shared by every component of the processing core.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::ErrorCategory;

/// Unique, immutable identifier for a [`Job`]. Never reused.
pub type JobId = Uuid;

/// The kind of summarization work a [`Job`] carries out.
///
/// `parameters` are stored and read as JSON, so kind-specific shapes live in
/// [`JobPayload`] rather than as separate `Job` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Video,
    Playlist,
    Batch,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Video => write!(f, "video"),
            JobKind::Playlist => write!(f, "playlist"),
            JobKind::Batch => write!(f, "batch"),
        }
    }
}

/// Priority a [`Job`] is serviced at. Lower numeric value is serviced first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Medium
    }
}

/// Kind-specific input for a [`Job`]. Opaque to every component except the
/// injected `Summarizer` and the worker pool's playlist expansion step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Video {
        url: String,
        #[serde(default)]
        model: Option<String>,
    },
    Playlist {
        playlist_id: String,
        video_urls: Vec<String>,
        #[serde(default)]
        model: Option<String>,
    },
    Batch {
        urls: Vec<String>,
        #[serde(default)]
        model: Option<String>,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Video { .. } => JobKind::Video,
            JobPayload::Playlist { .. } => JobKind::Playlist,
            JobPayload::Batch { .. } => JobKind::Batch,
        }
    }

    /// Cheap structural validation run at submission time, before a job ever
    /// reaches the queue: empty URLs or an empty playlist are rejected with
    /// `InvalidPayload` rather than surfacing as an opaque summarizer error
    /// later.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            JobPayload::Video { url, .. } if url.trim().is_empty() => Err("video url is empty"),
            JobPayload::Playlist {
                playlist_id,
                video_urls,
                ..
            } if playlist_id.trim().is_empty() || video_urls.is_empty() => {
                Err("playlist id or video list is empty")
            }
            JobPayload::Batch { urls, .. } if urls.is_empty() => Err("batch url list is empty"),
            _ => Ok(()),
        }
    }
}

/// Current lifecycle state of a [`Job`]. See the state machine in the core's
/// design notes for the legal transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Retry,
    Cancelled,
}

impl JobStatus {
    /// True once a job has reached a state that will never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition per the job state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Retry)
                | (InProgress, Failed)
                | (Retry, Pending)
                | (Retry, Cancelled)
        )
    }
}

/// The terminal error recorded on a job that failed, or the most recent error
/// observed on a job currently retrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastError {
    pub category: ErrorCategory,
    pub message: String,
    pub retriable: bool,
    pub occurred_at: DateTime<Utc>,
}

/// A unit of summarization work: one video, one playlist, or a batch of URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub priority: JobPriority,
    pub payload: JobPayload,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: JobStatus,
    pub progress: f64,
    pub attempt: u32,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub last_error: Option<LastError>,
    /// Monotonic submission sequence used to break priority ties FIFO, stable
    /// under clock skew. Not wall-clock: see the Priority Queue's ordering
    /// tie-break rule.
    pub sequence: u64,
}

impl Job {
    /// Construct a freshly submitted job. `progress` starts at 0, `attempt` at
    /// 0, and `status` is always `Pending`.
    pub fn new(
        id: JobId,
        kind: JobKind,
        priority: JobPriority,
        payload: JobPayload,
        client_id: String,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            priority,
            payload,
            client_id,
            created_at: now,
            updated_at: now,
            status: JobStatus::Pending,
            progress: 0.0,
            attempt: 0,
            result: None,
            last_error: None,
            sequence,
        }
    }
}

/// Request body accepted by the Priority Queue's `submit` operation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJobRequest {
    pub kind: JobKind,
    pub payload: JobPayload,
    #[serde(default)]
    pub priority: JobPriority,
    pub client_id: String,
}

/// A filter used by `StateStore::list`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub client_id: Option<String>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(client_id) = &self.client_id {
            if &job.client_id != client_id {
                return false;
            }
        }
        true
    }
}

/// Outward-facing view of a job returned by the query contract. Deliberately
/// narrower than [`Job`]: it never exposes `sequence`.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: f64,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LastError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            attempt: job.attempt,
            result: job.result.clone(),
            error: job.last_error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Extra key/value context a progress update may carry, e.g. `step` for a
/// playlist sub-item. Kept as a map rather than named fields since the
/// worker pool and summarizer may both contribute entries.
pub type ProgressContext = HashMap<String, serde_json::Value>;

/// One progress update emitted by a running job.
#[derive(Debug, Clone)]
pub struct ProgressRecord {
    pub job_id: JobId,
    pub fraction: f64,
    pub message: Option<String>,
    pub context: ProgressContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_video_url() {
        let payload = JobPayload::Video {
            url: "  ".to_owned(),
            model: None,
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn rejects_playlist_with_no_videos() {
        let payload = JobPayload::Playlist {
            playlist_id: "pl1".to_owned(),
            video_urls: vec![],
            model: None,
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_batch() {
        let payload = JobPayload::Batch {
            urls: vec!["https://example.com/a".to_owned()],
            model: None,
        };
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn state_machine_allows_pending_to_in_progress_only_forward() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::InProgress));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn cancelled_is_reachable_only_from_pending_or_retry() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Retry.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::InProgress.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn new_job_starts_pending_with_zero_progress_and_attempt() {
        let job = Job::new(
            Uuid::now_v7(),
            JobKind::Video,
            JobPriority::Medium,
            JobPayload::Video {
                url: "https://example.com/v".to_owned(),
                model: None,
            },
            "client-a".to_owned(),
            0,
            Utc::now(),
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.attempt, 0);
        assert!(job.last_error.is_none());
    }
}
