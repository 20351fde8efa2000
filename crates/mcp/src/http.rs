//! The axum surface of the gateway: streamable HTTP, SSE, WebSocket and legacy SSE.

mod legacy;
mod origin;
mod sse;
mod stats;
mod streamable;
mod ws;

use std::{convert::Infallible, sync::Arc};

use axum::{
    Router,
    http::{HeaderMap, HeaderName},
    middleware,
    response::sse::Event,
    routing::{get, post},
};
use dashmap::DashMap;
use secrecy::SecretString;
use serde_json::Value;

use crate::{
    error::GatewayError,
    gateway::Gateway,
    session::Session,
};

/// Session header of the streamable HTTP transport.
pub const MCP_SESSION_ID: HeaderName = HeaderName::from_static("mcp-session-id");

/// Resumption header of SSE reconnects.
pub const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

#[derive(Clone)]
pub(crate) struct HttpState {
    gateway: Gateway,
    legacy: Arc<DashMap<String, legacy::LegacyConnection>>,
}

/// Creates the axum router serving every MCP transport under `{path}/{tenant}/{connector}`.
pub fn router(gateway: Gateway) -> Router {
    log::info!("Creating MCP gateway router for path: {}", gateway.config().path);

    let state = HttpState {
        gateway: gateway.clone(),
        legacy: Arc::new(DashMap::new()),
    };

    let transports = Router::new()
        .route(
            "/{tenant}/{connector}",
            post(streamable::post).get(sse::get).delete(streamable::delete),
        )
        .route("/{tenant}/{connector}/ws", get(ws::upgrade))
        .route("/{tenant}/{connector}/sse", get(legacy::connect))
        .route("/{tenant}/{connector}/messages", post(legacy::message))
        .layer(middleware::from_fn_with_state(state.clone(), origin::check))
        .with_state(state.clone());

    let path = gateway.config().path.trim_end_matches('/');

    let mut router = if path.is_empty() {
        transports
    } else {
        Router::new().nest(path, transports)
    };

    if let Some(stats_path) = &gateway.config().stats_path {
        log::debug!("Exposing gateway statistics at {stats_path}");

        router = router.merge(Router::new().route(stats_path, get(stats::stats)).with_state(state));
    }

    router
}

fn header<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// The end-user token from the configured header.
fn user_token(gateway: &Gateway, headers: &HeaderMap) -> Option<SecretString> {
    header(headers, gateway.config().user_token_header.as_str()).map(SecretString::from)
}

/// Resolves the `Mcp-Session-Id` header, if any, to a session of this tenant and connector.
fn session(
    gateway: &Gateway,
    headers: &HeaderMap,
    tenant: &str,
    connector: &str,
) -> Result<Option<Session>, GatewayError> {
    let Some(session_id) = header(headers, MCP_SESSION_ID) else {
        return Ok(None);
    };

    match gateway.sessions().get_session(session_id) {
        Some(session) if session.matches(tenant, connector) => Ok(Some(session)),
        Some(_) => {
            log::debug!("Session {session_id} does not belong to {tenant}/{connector}");
            Err(GatewayError::InvalidSession)
        }
        None => Err(GatewayError::InvalidSession),
    }
}

/// Refuses event streams for tenants and connectors that are unknown or inactive.
async fn ensure_active(gateway: &Gateway, tenant: &str, connector: &str) -> Result<(), GatewayError> {
    if gateway.directory().is_active(tenant, connector).await {
        return Ok(());
    }

    log::debug!("Refused event stream for inactive or unknown {tenant}/{connector}");
    Err(GatewayError::TenantUnavailable)
}

/// A JSON-RPC message as an SSE `message` event.
fn message_event(message: &Value, id: Option<u64>) -> Result<Event, Infallible> {
    let event = Event::default().event("message").data(message.to_string());

    Ok(match id {
        Some(id) => event.id(id.to_string()),
        None => event,
    })
}
