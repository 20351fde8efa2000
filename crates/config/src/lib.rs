//! Relay configuration structures to map the relay.toml configuration.

#![deny(missing_docs)]

mod cors;
mod gateway;
mod health;
mod loader;
mod server;
mod tenant;
mod tls;

use std::{collections::BTreeMap, path::Path};

pub use cors::*;
pub use gateway::{EventBufferConfig, GatewayConfig, PoolConfig, SessionConfig, SseConfig, ToolPolicyConfig};
pub use health::HealthConfig;
pub use server::ServerConfig;
pub use tenant::{ConnectorConfig, Downstream, TenantConfig};
pub use tls::TlsServerConfig;

use serde::Deserialize;

/// Main configuration structure for Relay.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// MCP gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Tenants keyed by tenant id.
    #[serde(default)]
    pub tenants: BTreeMap<String, TenantConfig>,
}

impl Config {
    /// Load configuration from a file path, expanding `{{ env.VAR }}` references.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Checks the cross-field constraints serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}
