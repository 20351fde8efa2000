use axum::{
    extract::{Request, State},
    http::header::ORIGIN,
    middleware::Next,
    response::Response,
};

use super::HttpState;
use crate::error::GatewayError;

/// Refuses browser requests from origins outside `gateway.allowed_origins`.
///
/// Requests without an `Origin` header are not from a browser and pass.
pub(super) async fn check(State(state): State<HttpState>, request: Request, next: Next) -> Result<Response, GatewayError> {
    if let Some(origin) = super::header(request.headers(), ORIGIN)
        && !state.gateway.config().origin_allowed(origin)
    {
        log::debug!("Refusing request from origin {origin}");
        return Err(GatewayError::OriginNotAllowed(origin.to_string()));
    }

    Ok(next.run(request).await)
}
