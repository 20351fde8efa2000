use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use args::Args;
use clap::Parser;
use config::Config;
use mcp::ConnectorRegistry;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.config()?;

    if args.check {
        print_tenants(&config);
        return Ok(());
    }

    logger::init(&args);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    if let Err(e) = server::serve(serve_config(&args, config, shutdown)).await {
        log::error!("Server failed: {e}");
        std::process::exit(1);
    }

    Ok(())
}

fn serve_config(args: &Args, config: Config, shutdown: CancellationToken) -> ServeConfig {
    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 8000)));

    ServeConfig {
        listen_address,
        config,
        registry: ConnectorRegistry::new(),
        shutdown,
    }
}

fn print_tenants(config: &Config) {
    println!("Configuration is valid, gateway mounted at {}", config.gateway.path);

    for (tenant_id, tenant) in &config.tenants {
        for (connector_id, connector) in &tenant.connectors {
            let state = if tenant.active && connector.enabled { "active" } else { "inactive" };
            println!("  {tenant_id}/{connector_id} ({}, {state})", connector.connector_type(connector_id));
        }
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for the interrupt signal: {e}");
        return;
    }

    log::info!("Received interrupt, shutting down");
    shutdown.cancel();
}
