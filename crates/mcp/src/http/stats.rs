use axum::{Json, extract::State};

use super::HttpState;
use crate::gateway::GatewayStats;

/// Pool counters, cached backends and session counts.
pub(super) async fn stats(State(state): State<HttpState>) -> Json<GatewayStats> {
    Json(state.gateway.stats())
}
