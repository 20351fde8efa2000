use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt, stream};
use tokio::sync::broadcast::error::RecvError;

use super::{HttpState, LAST_EVENT_ID};
use crate::error::GatewayError;

/// `GET {path}/{tenant}/{connector}`: server-initiated messages as an SSE stream.
///
/// With a session and a `Last-Event-ID`, buffered events after that id are replayed
/// before live events.
pub(super) async fn get(
    State(state): State<HttpState>,
    Path((tenant, connector)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, GatewayError> {
    let gateway = &state.gateway;
    let session_id = super::session(gateway, &headers, &tenant, &connector)?.map(|session| session.id);

    super::ensure_active(gateway, &tenant, &connector).await?;

    // Subscribe before reading the buffer, so an event published in between shows up
    // in the live stream instead of being lost.
    let receiver = gateway.outbound().subscribe(&tenant, &connector);

    let last_event_id = super::header(&headers, LAST_EVENT_ID).and_then(|value| value.trim().parse::<u64>().ok());

    let replay: Vec<_> = match (&session_id, last_event_id) {
        (Some(session_id), Some(last_event_id)) => gateway
            .events()
            .get(session_id)
            .map(|buffer| buffer.replay_from(last_event_id).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    let floor = replay
        .last()
        .map(|event| event.id)
        .into_iter()
        .chain(last_event_id)
        .max()
        .unwrap_or_default();

    log::debug!(
        "Opened SSE stream for {tenant}/{connector}, replaying {} event(s) after {floor}",
        replay.len()
    );

    let replay = stream::iter(replay).map(|event| {
        Ok(Event::default()
            .event(event.event_type)
            .id(event.id.to_string())
            .data(event.data.to_string()))
    });

    let live = stream::unfold((receiver, session_id), move |(mut receiver, session_id)| async move {
        loop {
            match receiver.recv().await {
                Ok(event) if !event.is_visible_to(session_id.as_deref()) => continue,
                Ok(event) if event.event_id.is_some_and(|id| id <= floor) => continue,
                Ok(event) => {
                    let item = super::message_event(&event.message, event.event_id);
                    return Some((item, (receiver, session_id)));
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("SSE stream fell behind and skipped {skipped} event(s)");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let keep_alive = KeepAlive::new()
        .interval(gateway.config().sse.keepalive)
        .text("keepalive");

    Ok(Sse::new(replay.chain(live)).keep_alive(keep_alive))
}
