//! # Notification Stream Handler
//!
//! `GET /notifications/stream`: one long-lived `text/event-stream` response
//! per connection. Named SSE events mirror the five lifecycle topics plus
//! `heartbeat`; the SSE `id` field carries the event id so a reconnecting
//! client can send `Last-Event-ID` for best-effort replay from the owner's
//! recent-event ring.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::notify::{
    ConnectionRegistry, NotificationConnection, OutboundMessage, COALESCED_EVENT_NAME,
    HEARTBEAT_EVENT_NAME,
};
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::{authenticated_user, AppState};

/// Open a notification stream for the authenticated owner.
pub async fn notification_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let owner_id = authenticated_user(&headers)?;
    let client_addr = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let connection = state
        .registry
        .register(owner_id, client_addr)
        .map_err(|err| ApiError::CapacityExceeded(err.to_string()))?;

    // Best-effort replay: an unknown or evicted id silently starts live.
    if let Some(last_event_id) = last_event_id(&headers) {
        let missed = state.registry.replay_after(owner_id, last_event_id);
        debug!(
            owner_id = %owner_id,
            replayed = missed.len(),
            "reconnect replay"
        );
        for entry in missed {
            connection.enqueue_event(entry.event_name, entry.event_id, entry.data, &state.metrics);
        }
    }

    let (tx, rx) = mpsc::channel::<Event>(8);
    tokio::spawn(pump_connection(
        connection,
        Arc::clone(&state.registry),
        tx,
    ));

    Ok(Sse::new(ReceiverStream::new(rx).map(Ok::<_, Infallible>)))
}

fn last_event_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

/// Per-connection writer task: drains the bounded outbox into the SSE body.
/// Ends when the client disconnects or the connection is closed, then removes
/// the registration.
async fn pump_connection(
    connection: Arc<NotificationConnection>,
    registry: Arc<ConnectionRegistry>,
    tx: mpsc::Sender<Event>,
) {
    while let Some(message) = connection.next_message().await {
        let event = render_sse_event(message);
        if tx.send(event).await.is_err() {
            // Client went away; the stream body was dropped.
            break;
        }
        connection.touch();
    }
    registry.deregister(connection.owner_id, connection.connection_id);
    connection.close();
    debug!(connection_id = %connection.connection_id, "stream writer finished");
}

fn render_sse_event(message: OutboundMessage) -> Event {
    match message {
        OutboundMessage::Event {
            event_name,
            event_id,
            data,
        } => Event::default()
            .event(event_name)
            .id(event_id.to_string())
            .data(data.to_string()),
        OutboundMessage::Coalesced { suppressed } => Event::default()
            .event(COALESCED_EVENT_NAME)
            .data(serde_json::json!({ "suppressed": suppressed }).to_string()),
        OutboundMessage::Heartbeat => Event::default().event(HEARTBEAT_EVENT_NAME).data("{}"),
    }
}
