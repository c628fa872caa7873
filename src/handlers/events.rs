// src/handlers/events.rs

use std::convert::Infallible;

use axum::{
    Json,
    extract::{Extension, State},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream::{Stream, StreamExt};
use serde_json::{Value, json};

use crate::{
    error::AppError,
    utils::{
        jwt::{Claims, STAFF},
        notify::Notifier,
    },
};

/// Server-sent notification stream. The connection stays registered until
/// the client disconnects.
pub async fn stream_events(
    State(notifier): State<Notifier>,
    Extension(claims): Extension<Claims>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let subscription = notifier.subscribe(claims.user_id()?, claims.role);
    tracing::info!(connection = %subscription.id(), user_id = %claims.sub, "Event stream opened");

    let stream = subscription.into_stream().map(|n| {
        let event = Event::default().event(n.event.clone());
        Ok(match event.json_data(&n) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Failed to encode notification {}: {}", n.event, e);
                Event::default().comment("encoding error")
            }
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Open event streams, oldest first. Staff only.
pub async fn list_connections(
    State(notifier): State<Notifier>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(STAFF)?;

    let mut connections = notifier.connected();
    connections.sort_by_key(|(_, c)| c.connected_at);

    let items: Vec<Value> = connections
        .into_iter()
        .map(|(id, c)| {
            json!({
                "id": id,
                "user_id": c.user_id,
                "role": c.role,
                "connected_at": c.connected_at,
            })
        })
        .collect();

    Ok(Json(json!({ "total": items.len(), "items": items })))
}
