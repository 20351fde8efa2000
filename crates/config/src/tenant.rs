//! Tenants and the connectors they have enabled.

use std::{collections::BTreeMap, path::PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// A tenant and its connectors.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantConfig {
    /// Inactive tenants are rejected before any backend is bound.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Connectors keyed by connector id.
    #[serde(default)]
    pub connectors: BTreeMap<String, ConnectorConfig>,
}

/// A connector enabled for a tenant.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorConfig {
    /// Connector type, e.g. `github`. Defaults to the connector id.
    #[serde(rename = "type")]
    pub connector_type: Option<String>,
    /// Disabled connectors are treated as inactive.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Credential handed to the connector when a backend is constructed.
    pub credential: Option<SecretString>,
    /// Environment variable the credential is exported as for stdio downstreams.
    pub credential_env: Option<String>,
    /// Command line of a stdio downstream MCP server.
    pub cmd: Option<Vec<String>>,
    /// Extra environment for a stdio downstream.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for a stdio downstream.
    pub cwd: Option<PathBuf>,
    /// Endpoint of a streamable-http downstream MCP server.
    pub url: Option<Url>,
}

impl ConnectorConfig {
    /// The connector type, falling back to the connector id.
    pub fn connector_type<'a>(&'a self, connector_id: &'a str) -> &'a str {
        self.connector_type.as_deref().unwrap_or(connector_id)
    }

    /// The downstream MCP server backing this connector, if configured.
    pub fn downstream(&self) -> Option<Downstream> {
        match (&self.cmd, &self.url) {
            (Some(cmd), None) => Some(Downstream::Stdio {
                cmd: cmd.clone(),
                env: self.env.clone(),
                cwd: self.cwd.clone(),
                credential_env: self.credential_env.clone(),
            }),
            (None, Some(url)) => Some(Downstream::Http { url: url.clone() }),
            _ => None,
        }
    }
}

/// A downstream MCP server launched or connected per backend instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Downstream {
    /// Child process speaking MCP over stdio.
    Stdio {
        /// Executable followed by its arguments.
        cmd: Vec<String>,
        /// Extra environment.
        env: BTreeMap<String, String>,
        /// Working directory.
        cwd: Option<PathBuf>,
        /// Environment variable the credential is exported as.
        credential_env: Option<String>,
    },
    /// Remote server speaking streamable HTTP.
    Http {
        /// Endpoint URL.
        url: Url,
    },
}

fn default_true() -> bool {
    true
}
