//! Relay server library.
//!
//! Wires the gateway, its maintenance task and the HTTP listener together, for the
//! binary and for the integration tests.

#![deny(missing_docs)]

mod cors;
mod health;

use std::{net::SocketAddr, time::Duration};

use anyhow::anyhow;
use axum::Router;
use axum_server::{Handle, tls_rustls::RustlsConfig};
use config::Config;
use mcp::{ConnectorRegistry, Gateway};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

pub(crate) const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Configuration for serving Relay.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized Relay TOML configuration.
    pub config: Config,
    /// Connector factories by connector type. Downstream connectors need no registration.
    pub registry: ConnectorRegistry,
    /// Cancelling the token stops the listener and drops every backend and session.
    pub shutdown: CancellationToken,
}

/// Starts and runs the Relay server until the shutdown token is cancelled.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        registry,
        shutdown,
    }: ServeConfig,
) -> anyhow::Result<()> {
    config.validate()?;

    let cors = match &config.server.cors {
        Some(cors_config) => cors::generate(cors_config),
        None => CorsLayer::permissive(),
    };

    let gateway = Gateway::builder(config.gateway.clone())
        .tenants(config.tenants.clone())
        .registry(registry)
        .build();

    if config.tenants.is_empty() {
        log::warn!("Server starting without tenants. Configure [tenants.<id>.connectors.<id>] to serve connectors.");
    }

    let mut app = Router::new().merge(mcp::router(gateway.clone()).layer(cors.clone()));

    if config.server.health.enabled {
        if let Some(listen) = config.server.health.listen {
            let health = health::bind_health_endpoint(
                listen,
                config.server.tls.clone(),
                config.server.health.clone(),
                shutdown.clone(),
            );

            tokio::spawn(async move {
                if let Err(e) = health.await {
                    log::error!("{e:#}");
                }
            });
        } else {
            app = app.merge(health::router(&config.server.health, shutdown.clone()).layer(cors));
        }
    }

    let maintenance = gateway.spawn_maintenance(shutdown.clone());

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    let path = &config.gateway.path;

    let served = match &config.server.tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            log::info!("MCP gateway available at: https://{listen_address}{path}/{{tenant}}/{{connector}}");

            let handle = Handle::new();
            let shutdown_handle = handle.clone();
            let token = shutdown.clone();

            tokio::spawn(async move {
                token.cancelled().await;
                shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
            });

            axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(|e| anyhow!("Failed to start HTTPS server: {e}"))
        }
        None => {
            log::info!("MCP gateway available at: http://{listen_address}{path}/{{tenant}}/{{connector}}");

            let server = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());

            // Event streams never end on their own, so graceful shutdown gets a deadline.
            tokio::select! {
                result = async { server.await } => result.map_err(|e| anyhow!("Failed to start HTTP server: {e}")),
                _ = grace_period_elapsed(&shutdown) => {
                    log::warn!("Closing connections still open after the shutdown grace period");
                    Ok(())
                }
            }
        }
    };

    shutdown.cancel();

    if let Err(e) = maintenance.await {
        log::error!("Gateway maintenance task failed: {e}");
    }

    gateway.shutdown();

    served
}

async fn grace_period_elapsed(shutdown: &CancellationToken) {
    shutdown.cancelled().await;
    tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
}
