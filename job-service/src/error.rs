use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use job_common::error::SubmissionError;
use serde_json::json;

/// Maps a [`SubmissionError`] to the HTTP status the job submission endpoint
/// replies with, mirroring `hook-api`'s pattern of turning a typed queue
/// error into a response at the handler boundary rather than inside the
/// queue itself.
pub struct SubmissionRejection(pub SubmissionError);

impl IntoResponse for SubmissionRejection {
    fn into_response(self) -> Response {
        let status = match self.0 {
            SubmissionError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            SubmissionError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            SubmissionError::InvalidPayload => StatusCode::BAD_REQUEST,
            SubmissionError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        };

        (
            status,
            axum::Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}
