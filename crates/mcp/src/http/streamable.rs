use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use super::{HttpState, MCP_SESSION_ID};
use crate::{
    error::GatewayError,
    protocol,
    transport::{Transport, TransportKind},
};

/// `POST {path}/{tenant}/{connector}`: one JSON-RPC message or batch per request.
pub(super) async fn post(
    State(state): State<HttpState>,
    Path((tenant, connector)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let gateway = &state.gateway;

    let payload = match protocol::parse_payload(&body) {
        Ok(payload) => payload,
        Err(error) => {
            log::debug!("Rejected request body for {tenant}/{connector}: {}", error.message);
            return Ok((StatusCode::BAD_REQUEST, Json(protocol::error_envelope(None, error))).into_response());
        }
    };

    let mut transport = match super::session(gateway, &headers, &tenant, &connector)? {
        Some(session) => Transport::from_session(gateway.clone(), TransportKind::StreamableHttp, session),
        None => {
            let transport = Transport::new(gateway.clone(), TransportKind::StreamableHttp, tenant, connector)
                .with_user_token(super::user_token(gateway, &headers));

            if gateway.config().sessions.enabled {
                transport
            } else {
                transport.stateless()
            }
        }
    };

    let reply = transport.handle_payload(payload).await;

    let mut response = match reply {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };

    if let Some(session_id) = transport.session_id()
        && let Ok(value) = HeaderValue::from_str(session_id)
    {
        response.headers_mut().insert(MCP_SESSION_ID, value);
    }

    Ok(response)
}

/// `DELETE {path}/{tenant}/{connector}`: terminates the session.
pub(super) async fn delete(
    State(state): State<HttpState>,
    Path((tenant, connector)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, GatewayError> {
    if super::header(&headers, MCP_SESSION_ID).is_none() {
        return Err(GatewayError::MissingSession);
    }

    let Some(session) = super::session(&state.gateway, &headers, &tenant, &connector)? else {
        return Err(GatewayError::MissingSession);
    };

    state.gateway.sessions().close_session(&session.id);

    Ok(StatusCode::NO_CONTENT)
}
