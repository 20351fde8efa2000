use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Errors answered at the HTTP level, before or instead of a JSON-RPC exchange.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The session id is unknown, expired, or belongs to another tenant or connector.
    #[error("Invalid or expired session ID")]
    InvalidSession,
    /// A request that needs a session came without the `Mcp-Session-Id` header.
    #[error("Missing Mcp-Session-Id header")]
    MissingSession,
    /// The `Origin` header is not in the allow-list.
    #[error("Origin not allowed: {0}")]
    OriginNotAllowed(String),
    /// A legacy message was posted for a stream that does not exist.
    #[error("Unknown SSE stream: {0}")]
    UnknownStream(String),
    /// A stream was requested for a tenant or connector that is unknown or inactive.
    #[error("Tenant or connector not found or inactive")]
    TenantUnavailable,
}

impl GatewayError {
    /// The HTTP status of this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidSession | Self::MissingSession => StatusCode::BAD_REQUEST,
            Self::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
            Self::UnknownStream(_) | Self::TenantUnavailable => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        log::debug!("Answering with {}: {self}", status.as_u16());

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
