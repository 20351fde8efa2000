//! HTTP listener settings.

use std::net::SocketAddr;

use serde::Deserialize;

use crate::{CorsConfig, HealthConfig, TlsServerConfig};

/// HTTP listener settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind. The command line flag takes precedence.
    pub listen_address: Option<SocketAddr>,
    /// Serve over TLS when set.
    pub tls: Option<TlsServerConfig>,
    /// Health endpoint.
    #[serde(default)]
    pub health: HealthConfig,
    /// CORS rules. Permissive when not set.
    pub cors: Option<CorsConfig>,
}
