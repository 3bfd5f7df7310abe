//! Event types carried over the Server-Sent Events bus.
//!
//! The closed event taxonomy and per-type payload shapes are grounded in
//! `feature-flags`'s SSE surface (`sse_endpoint.rs` sends a `connected` event
//! first, then heartbeats on a timeout loop); the payload enum itself
//! follows the same externally-tagged `#[serde(tag = "kind")]` style used by
//! `JobPayload` in this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::ErrorCategory;
use crate::job::JobId;

/// The closed set of event types the bus ever emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connected,
    Heartbeat,
    JobStarted,
    JobProgress,
    JobRetry,
    JobComplete,
    JobFailed,
    System,
}

impl EventType {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            EventType::Connected => "connected",
            EventType::Heartbeat => "heartbeat",
            EventType::JobStarted => "job_started",
            EventType::JobProgress => "job_progress",
            EventType::JobRetry => "job_retry",
            EventType::JobComplete => "job_complete",
            EventType::JobFailed => "job_failed",
            EventType::System => "system",
        }
    }
}

/// Where a completed job's output came from, carried on `job_complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Cache,
    Generated,
}

/// Per-type event payload. Externally tagged so the JSON on the wire is a
/// plain object matching each event type's documented fields, not a
/// `{"kind": ..., ...}` envelope duplicating the SSE `event:` line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Connected {
        connection_id: Uuid,
        subscriptions: Vec<String>,
    },
    Heartbeat {
        at: DateTime<Utc>,
    },
    JobStarted {
        job_id: JobId,
    },
    JobProgress {
        job_id: JobId,
        progress: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<String>,
    },
    JobRetry {
        job_id: JobId,
        attempt: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    JobComplete {
        job_id: JobId,
        result_summary_excerpt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        source: ResultSource,
    },
    JobFailed {
        job_id: JobId,
        error_category: ErrorCategory,
        message: String,
    },
    System {
        message: String,
    },
}

/// One event as it travels through the bus, before wire framing or
/// compression is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub payload: EventPayload,
    /// When set, only connections whose `subscriber_key` matches are
    /// eligible to receive this event. `None` means broadcast to every
    /// connection subscribed to `event_type`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_subscriber_key: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self {
            event_type,
            payload,
            target_subscriber_key: None,
        }
    }

    pub fn for_subscriber(mut self, subscriber_key: impl Into<String>) -> Self {
        self.target_subscriber_key = Some(subscriber_key.into());
        self
    }

    pub fn job_started(job_id: JobId) -> Self {
        Self::new(EventType::JobStarted, EventPayload::JobStarted { job_id })
    }

    pub fn job_progress(
        job_id: JobId,
        progress: f64,
        message: Option<String>,
        step: Option<String>,
    ) -> Self {
        Self::new(
            EventType::JobProgress,
            EventPayload::JobProgress {
                job_id,
                progress,
                message,
                step,
            },
        )
    }

    pub fn job_retry(job_id: JobId, attempt: u32, message: Option<String>) -> Self {
        Self::new(
            EventType::JobRetry,
            EventPayload::JobRetry {
                job_id,
                attempt,
                message,
            },
        )
    }

    pub fn job_complete(
        job_id: JobId,
        result_summary_excerpt: String,
        title: Option<String>,
        source: ResultSource,
    ) -> Self {
        Self::new(
            EventType::JobComplete,
            EventPayload::JobComplete {
                job_id,
                result_summary_excerpt,
                title,
                source,
            },
        )
    }

    pub fn job_failed(job_id: JobId, error_category: ErrorCategory, message: String) -> Self {
        Self::new(
            EventType::JobFailed,
            EventPayload::JobFailed {
                job_id,
                error_category,
                message,
            },
        )
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(
            EventType::System,
            EventPayload::System {
                message: message.into(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_progress_serializes_without_optional_fields() {
        let event = Event::job_progress(Uuid::now_v7(), 0.5, None, None);
        let json = serde_json::to_value(&event).unwrap();
        let payload = &json["payload"];
        assert!(payload.get("message").is_none());
        assert!(payload.get("step").is_none());
        assert_eq!(payload["progress"], 0.5);
    }

    #[test]
    fn event_type_wire_strings_match_snake_case_names() {
        assert_eq!(EventType::JobComplete.as_wire_str(), "job_complete");
        assert_eq!(EventType::Connected.as_wire_str(), "connected");
    }
}
