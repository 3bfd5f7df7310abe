//! A minimal stand-in for the real `Summarizer` this binary would be
//! deployed with. The core treats summarization as an injected external
//! collaborator it never implements (transcript fetch, the third-party AI
//! call) — this echo implementation exists only so the composition root is
//! runnable end to end without that collaborator wired in.

use async_trait::async_trait;
use job_common::job::JobPayload;
use job_worker::{ProgressSink, SummarizeContext, SummarizeError, SummarizeOutcome, Summarizer};
use rand::Rng;
use tokio::time::Duration;

/// How often the echo summarizer simulates a transient upstream failure,
/// so the composition root exercises the retry path without a real
/// summarization backend wired in.
const SIMULATED_TRANSIENT_FAILURE_RATE: f64 = 0.1;

pub struct EchoSummarizer;

#[async_trait]
impl Summarizer for EchoSummarizer {
    async fn summarize(
        &self,
        payload: &JobPayload,
        progress: &ProgressSink,
        ctx: &SummarizeContext,
    ) -> Result<SummarizeOutcome, SummarizeError> {
        let url = match payload {
            JobPayload::Video { url, .. } => url.clone(),
            JobPayload::Batch { urls, .. } => urls.first().cloned().unwrap_or_default(),
            JobPayload::Playlist { playlist_id, .. } => playlist_id.clone(),
        };

        progress.report(0.25, Some("fetching transcript".to_owned())).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        if ctx.is_cancelled() {
            return Err(SummarizeError::new("cancelled while fetching transcript"));
        }
        if rand::thread_rng().gen_bool(SIMULATED_TRANSIENT_FAILURE_RATE) {
            return Err(SummarizeError::new("timeout waiting on transcript fetch"));
        }

        progress.report(0.75, Some("summarizing".to_owned())).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        if ctx.is_cancelled() {
            return Err(SummarizeError::new("cancelled while summarizing"));
        }

        Ok(SummarizeOutcome {
            result: format!("summary of {url}"),
        })
    }
}
