//! Crate-wide error kinds surfaced by the core's external contracts, kept
//! distinct from `ErrorCategory` (see [`crate::classify`]), which classifies
//! a summarizer's failure rather than a caller's mistake.
//!
//! Grounded in `hook_common::pgqueue::PgQueueError`'s shape: a small,
//! `thiserror`-derived enum per subsystem rather than one crate-wide
//! catch-all, so each component's fallible boundary is typed on its own
//! terms.

use thiserror::Error;

/// Rejections a caller can see from [`crate::queue::PriorityQueue::submit`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("queue is at capacity")]
    QueueFull,
    #[error("client exceeded its submission rate limit")]
    RateLimited,
    #[error("job payload failed validation")]
    InvalidPayload,
    #[error("the queue is shutting down and no longer accepts submissions")]
    Shutdown,
}

/// Rejections a caller can see when opening an event-stream connection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("the connection pool is at its global capacity")]
    PoolFull,
    #[error("this client has reached its per-client connection limit")]
    PerClientLimit,
    #[error("the host rejected this connection as unauthorized")]
    Unauthorized,
}
