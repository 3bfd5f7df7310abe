//! The axum Server-Sent Events handler, wired to an [`EventBus`].
//!
//! Grounded in `feature-flags::api::sse_endpoint::feature_flags_stream`: send
//! a `connected` event first, then loop on `tokio::time::timeout` around the
//! connection's next event, falling back to a heartbeat comment on timeout.
//! Reworked to read from this crate's bounded [`ConnectionQueue`] instead of
//! an `mpsc::UnboundedReceiver`, and to run compression over the JSON before
//! framing it as an `Event`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::http::StatusCode;
use async_stream::stream;
use futures::stream::Stream;
use job_common::event::{Event, EventPayload, EventType};
use serde::Deserialize;
use tracing::info;

use crate::compression::render;
use crate::pool::EventBus;

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    pub client_id: String,
    /// Comma-separated list of event type names, e.g. `job_progress,job_complete`.
    #[serde(default)]
    pub subscribe: Option<String>,
}

fn parse_subscriptions(raw: Option<String>) -> Vec<String> {
    raw.map(|s| s.split(',').map(|p| p.trim().to_owned()).collect())
        .unwrap_or_default()
}

fn to_sse_event(event: &Event, compression_threshold: usize) -> Result<SseEvent, Infallible> {
    let json = serde_json::to_string(&event.payload).unwrap_or_else(|_| "{}".to_owned());
    let wire = render(event.event_type.as_wire_str(), &json, compression_threshold);
    Ok(SseEvent::default().event(wire.event_type).data(wire.data))
}

/// `GET /events?client_id=...&subscribe=job_progress,job_complete`
pub async fn event_stream(
    State(bus): State<Arc<EventBus>>,
    Query(params): Query<SubscribeQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, StatusCode> {
    let subscriptions = parse_subscriptions(params.subscribe);
    let connection = match bus.register(params.client_id.clone(), subscriptions.clone()).await {
        Ok(connection) => connection,
        Err(error) => {
            info!("rejected sse connection for {}: {error}", params.client_id);
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    };

    info!("sse connection {} established for {}", connection.id, params.client_id);

    let compression_threshold = bus.compression_threshold();
    let heartbeat_deadline = bus.heartbeat_interval();
    let connection_id = connection.id;
    let queue = connection.queue.clone();
    let bus_for_stream = bus.clone();

    let stream = stream! {
        let connected = Event::new(
            EventType::Connected,
            EventPayload::Connected {
                connection_id,
                subscriptions,
            },
        );
        yield to_sse_event(&connected, compression_threshold);

        loop {
            connection.touch().await;
            match queue.next(heartbeat_deadline).await {
                Some(event) => {
                    let is_shutdown = matches!(
                        (&event.event_type, &event.payload),
                        (EventType::System, EventPayload::System { message }) if message == "shutdown"
                    );
                    yield to_sse_event(&event, compression_threshold);
                    if is_shutdown {
                        break;
                    }
                }
                None => {
                    yield to_sse_event(
                        &Event::new(
                            EventType::Heartbeat,
                            EventPayload::Heartbeat { at: chrono::Utc::now() },
                        ),
                        compression_threshold,
                    );
                }
            }
        }

        bus_for_stream.unregister(connection_id).await;
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn stats(State(bus): State<Arc<EventBus>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "connections_active": bus.connection_count().await,
    }))
}
