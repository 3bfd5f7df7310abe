//! HTTP routes exposing the core's external contracts (§6): submission,
//! query, listing, and the SSE event stream.
//!
//! Grounded in `hook-api::handlers`'s add_routes/state pattern (route
//! closures holding only the shared services they need, not the whole
//! process), generalized here to three domain services instead of one
//! queue handle. The SSE handler lives in `job-events` and is wired in via
//! `FromRef` so it can keep its own narrower `State<Arc<EventBus>>` extractor
//! without this crate re-implementing it.

use std::sync::Arc;

use axum::extract::{FromRef, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use job_common::job::{JobFilter, JobId, JobView, NewJobRequest};
use job_common::metrics::record_job_submitted;
use job_common::queue::PriorityQueue;
use job_common::store::StateStore;
use job_events::EventBus;
use serde::Serialize;
use uuid::Uuid;

use crate::error::SubmissionRejection;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<PriorityQueue>,
    pub store: Arc<StateStore>,
    pub bus: Arc<EventBus>,
}

impl FromRef<AppState> for Arc<EventBus> {
    fn from_ref(state: &AppState) -> Self {
        state.bus.clone()
    }
}

/// Build the domain router and bind `state` to it in one step, the same
/// shape as `feature-flags::router::router` — avoids ever handing callers an
/// intermediate `Router<AppState>` whose state type could get pinned wrong.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:id", get(get_job).delete(cancel_job))
        .route("/events", get(job_events::sse::event_stream))
        .route("/events/stats", get(job_events::sse::stats))
        .with_state(state)
}

#[derive(Serialize)]
struct SubmitResponse {
    job_id: JobId,
}

async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<NewJobRequest>,
) -> Result<impl IntoResponse, SubmissionRejection> {
    let kind = request.payload.kind();
    match state.queue.submit(request, &state.store).await {
        Ok(job) => {
            record_job_submitted(&kind.to_string());
            Ok(Json(SubmitResponse { job_id: job.id }))
        }
        Err(error) => Err(SubmissionRejection(error)),
    }
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, axum::http::StatusCode> {
    state
        .store
        .get(id)
        .await
        .map(|job| Json(JobView::from(&job)))
        .ok_or(axum::http::StatusCode::NOT_FOUND)
}

/// Cancel a job that is still `Pending` or `Retry`. Mirrors the job state
/// machine's only externally-reachable path to `Cancelled`: a job already
/// picked up by a worker, or already terminal, cannot be cancelled and the
/// request is rejected with `409 Conflict` rather than silently ignored.
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, StatusCode> {
    match state.store.cancel(id).await {
        Some(job) => Ok(Json(JobView::from(&job))),
        None => match state.store.get(id).await {
            Some(_) => Err(StatusCode::CONFLICT),
            None => Err(StatusCode::NOT_FOUND),
        },
    }
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobView>> {
    let jobs = state.store.list(&JobFilter::default()).await;
    Json(jobs.iter().map(JobView::from).collect())
}
