use axum::{
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    future::BoxFuture,
    stream::{FuturesUnordered, SplitSink},
};
use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use super::HttpState;
use crate::{
    gateway::Gateway,
    protocol::{self, Payload},
    transport::{self, Routed, Transport, TransportKind, TransportState},
};

/// `GET {path}/{tenant}/{connector}/ws`: a full-duplex MCP connection.
pub(super) async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<HttpState>,
    Path((tenant, connector)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let user_token = super::user_token(&state.gateway, &headers);
    let gateway = state.gateway;

    ws.on_upgrade(move |socket| serve(socket, gateway, tenant, connector, user_token))
}

async fn serve(socket: WebSocket, gateway: Gateway, tenant: String, connector: String, user_token: Option<SecretString>) {
    let connection_id = uuid::Uuid::new_v4().simple().to_string();

    log::debug!("WebSocket connection {connection_id} opened for {tenant}/{connector}");

    let mut transport = Transport::new(gateway.clone(), TransportKind::WebSocket, &tenant, &connector)
        .with_connection_id(connection_id.clone())
        .with_user_token(user_token);

    let mut outbound = gateway.outbound().subscribe(&tenant, &connector);
    let (mut sink, mut stream) = socket.split();
    let mut in_flight: FuturesUnordered<BoxFuture<'static, Value>> = FuturesUnordered::new();

    loop {
        let reply = tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => handle_text(&mut transport, text.as_bytes(), &mut in_flight).await,
                Some(Ok(Message::Binary(_))) => {
                    log::debug!("Ignoring binary frame on WebSocket connection {connection_id}");
                    None
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => None,
                Some(Err(error)) => {
                    log::debug!("WebSocket connection {connection_id} failed: {error}");
                    break;
                }
            },
            Some(response) = in_flight.next() => Some(response),
            event = outbound.recv() => match event {
                Ok(event) if transport.state() == TransportState::Ready && event.is_visible_to(Some(&connection_id)) => {
                    Some(event.message)
                }
                Ok(_) => None,
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("WebSocket connection {connection_id} skipped {skipped} server message(s)");
                    None
                }
                Err(RecvError::Closed) => break,
            },
        };

        if let Some(reply) = reply
            && send(&mut sink, &reply).await.is_err()
        {
            break;
        }
    }

    transport.close();

    log::debug!(
        "WebSocket connection {connection_id} closed with {} request(s) still running",
        in_flight.len()
    );
}

async fn handle_text(
    transport: &mut Transport,
    text: &[u8],
    in_flight: &mut FuturesUnordered<BoxFuture<'static, Value>>,
) -> Option<Value> {
    match protocol::parse_payload(text) {
        Err(error) => Some(protocol::error_envelope(None, error)),
        Ok(Payload::Single(message)) => match transport.route(message).await {
            Routed::Reply(reply) => reply,
            Routed::Deferred(response) => {
                in_flight.push(transport::detach(response));
                None
            }
        },
        Ok(batch) => transport.handle_payload(batch).await,
    }
}

async fn send(sink: &mut SplitSink<WebSocket, Message>, message: &Value) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => sink.send(Message::Text(text.into())).await,
        Err(error) => {
            log::error!("Failed to serialize outgoing message: {error}");

            let frame = CloseFrame {
                code: close_code::ERROR,
                reason: "Internal error".into(),
            };

            sink.send(Message::Close(Some(frame))).await?;

            Err(axum::Error::new(error))
        }
    }
}
