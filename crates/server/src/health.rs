use std::net::SocketAddr;

use anyhow::Context;
use axum::{Json, Router, extract::State, routing::get};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use config::{HealthConfig, TlsServerConfig};
use http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::SHUTDOWN_GRACE_PERIOD;

#[derive(Debug, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum HealthState {
    Healthy,
    /// Shutdown started; open streams are being drained.
    Draining,
}

/// Liveness check. Load balancers stop routing here once shutdown begins.
pub(crate) async fn health(State(shutdown): State<CancellationToken>) -> (StatusCode, Json<HealthState>) {
    if shutdown.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthState::Draining))
    } else {
        (StatusCode::OK, Json(HealthState::Healthy))
    }
}

pub(crate) fn router(config: &HealthConfig, shutdown: CancellationToken) -> Router {
    Router::new().route(&config.path, get(health)).with_state(shutdown)
}

/// Serves the health endpoint on its own listener until `shutdown` is cancelled.
pub(super) async fn bind_health_endpoint(
    addr: SocketAddr,
    tls_config: Option<TlsServerConfig>,
    health_config: HealthConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(&health_config, shutdown.clone()).into_make_service();
    let path = &health_config.path;

    let handle = Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.cancelled().await;
        shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
    });

    match tls_config {
        Some(tls) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls.certificate, &tls.key)
                .await
                .context("Failed to load TLS certificate and key for the health endpoint")?;

            log::info!("Health endpoint available at: https://{addr}{path}");

            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(app)
                .await
                .context("Health endpoint listener failed")?;
        }
        None => {
            log::info!("Health endpoint available at: http://{addr}{path}");

            axum_server::bind(addr)
                .handle(handle)
                .serve(app)
                .await
                .context("Health endpoint listener failed")?;
        }
    }

    Ok(())
}
