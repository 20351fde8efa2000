//! The deprecated two-endpoint transport: an SSE stream for responses and a message
//! endpoint the client posts to.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use dashmap::DashMap;
use futures_util::{Stream, StreamExt, stream};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, mpsc};

use super::HttpState;
use crate::{
    error::GatewayError,
    outbound::OutboundEvent,
    protocol::{self, Payload},
    transport::{self, Routed, Transport, TransportKind},
};

#[derive(Clone)]
pub(super) struct LegacyConnection {
    tenant: String,
    connector: String,
    transport: Arc<Mutex<Transport>>,
    responses: mpsc::Sender<Value>,
}

/// Unregisters the connection when its stream is dropped.
struct ConnectionGuard {
    connections: Arc<DashMap<String, LegacyConnection>>,
    connection_id: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some((_, connection)) = self.connections.remove(&self.connection_id) {
            if let Ok(mut transport) = connection.transport.try_lock() {
                transport.close();
            }

            log::debug!("Legacy SSE connection {} closed", self.connection_id);
        }
    }
}

struct Live {
    responses: mpsc::Receiver<Value>,
    outbound: broadcast::Receiver<OutboundEvent>,
    guard: ConnectionGuard,
}

/// `GET {path}/{tenant}/{connector}/sse`: opens the stream and announces the message endpoint.
pub(super) async fn connect(
    State(state): State<HttpState>,
    Path((tenant, connector)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, GatewayError> {
    let gateway = state.gateway.clone();
    super::ensure_active(&gateway, &tenant, &connector).await?;

    let connection_id = uuid::Uuid::new_v4().simple().to_string();

    let transport = Transport::new(gateway.clone(), TransportKind::LegacySse, &tenant, &connector)
        .with_connection_id(connection_id.clone())
        .with_user_token(super::user_token(&gateway, &headers));

    let (sender, responses) = mpsc::channel(gateway.config().sse.channel_capacity.max(1));
    let outbound = gateway.outbound().subscribe(&tenant, &connector);

    let endpoint = format!(
        "{}/{tenant}/{connector}/messages?sessionId={connection_id}",
        gateway.config().path.trim_end_matches('/')
    );

    state.legacy.insert(
        connection_id.clone(),
        LegacyConnection {
            tenant,
            connector,
            transport: Arc::new(Mutex::new(transport)),
            responses: sender,
        },
    );

    log::debug!("Legacy SSE connection {connection_id} opened, posting to {endpoint}");

    let live = Live {
        responses,
        outbound,
        guard: ConnectionGuard {
            connections: state.legacy.clone(),
            connection_id,
        },
    };

    let endpoint = stream::once(async move { Ok(Event::default().event("endpoint").data(endpoint)) });

    let messages = stream::unfold(live, |mut live| async move {
        loop {
            tokio::select! {
                response = live.responses.recv() => {
                    let response = response?;
                    return Some((super::message_event(&response, None), live));
                }
                event = live.outbound.recv() => match event {
                    Ok(event) if event.is_visible_to(Some(&live.guard.connection_id)) => {
                        return Some((super::message_event(&event.message, None), live));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Legacy SSE connection {} skipped {skipped} server message(s)", live.guard.connection_id);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    });

    let keep_alive = KeepAlive::new()
        .interval(gateway.config().sse.legacy_heartbeat)
        .text("heartbeat");

    Ok(Sse::new(endpoint.chain(messages)).keep_alive(keep_alive))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct MessageQuery {
    #[serde(rename = "sessionId", default)]
    session_id: String,
}

/// `POST {path}/{tenant}/{connector}/messages?sessionId=`: the response arrives on the stream.
pub(super) async fn message(
    State(state): State<HttpState>,
    Path((tenant, connector)): Path<(String, String)>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let connection = state
        .legacy
        .get(&query.session_id)
        .filter(|connection| connection.tenant == tenant && connection.connector == connector)
        .map(|connection| connection.clone())
        .ok_or(GatewayError::UnknownStream(query.session_id))?;

    let payload = match protocol::parse_payload(&body) {
        Ok(payload) => payload,
        Err(error) => {
            return Ok((StatusCode::BAD_REQUEST, Json(protocol::error_envelope(None, error))).into_response());
        }
    };

    match payload {
        // Routed here, so initialize and the requests after it are seen in posting order.
        Payload::Single(message) => {
            let routed = connection.transport.lock().await.route(message).await;

            match routed {
                Routed::Reply(Some(reply)) => deliver(&connection, reply).await,
                Routed::Reply(None) => (),
                Routed::Deferred(response) => {
                    let response = transport::detach(response);

                    tokio::spawn(async move {
                        let reply = response.await;
                        deliver(&connection, reply).await;
                    });
                }
            }
        }
        batch => {
            tokio::spawn(async move {
                let reply = connection.transport.lock().await.handle_payload(batch).await;

                if let Some(reply) = reply {
                    deliver(&connection, reply).await;
                }
            });
        }
    }

    Ok(StatusCode::ACCEPTED.into_response())
}

async fn deliver(connection: &LegacyConnection, reply: Value) {
    if connection.responses.send(reply).await.is_err() {
        log::debug!(
            "Dropped a response for {}/{}: the stream is gone",
            connection.tenant,
            connection.connector
        );
    }
}
