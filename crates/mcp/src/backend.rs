//! Backend instances: a constructed connector bound to one tenant and connector.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use rmcp::model::{CallToolResult, JsonObject, ReadResourceResult, Resource, Tool};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::{
    connector::{Connector, ToolContext},
    tenant::TenantDirectory,
};

/// Pool identity of a backend instance.
///
/// End-user tokens are never stored in the key, only their SHA-256 fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantConnectorKey {
    /// Tenant id.
    pub tenant: String,
    /// Connector id.
    pub connector: String,
    /// Fingerprint of the end-user token the instance is scoped to.
    pub token_fingerprint: Option<String>,
}

impl TenantConnectorKey {
    /// Creates a key, fingerprinting the token if one is given.
    pub fn new(tenant: impl Into<String>, connector: impl Into<String>, token: Option<&SecretString>) -> Self {
        Self {
            tenant: tenant.into(),
            connector: connector.into(),
            token_fingerprint: token.map(|token| fingerprint(token.expose_secret())),
        }
    }

    /// True if the key belongs to the given tenant and connector, whatever the token scope.
    pub fn matches(&self, tenant: &str, connector: &str) -> bool {
        self.tenant == tenant && self.connector == connector
    }
}

impl fmt::Display for TenantConnectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.connector)?;

        if let Some(fingerprint) = &self.token_fingerprint {
            write!(f, "#{}", &fingerprint[..8])?;
        }

        Ok(())
    }
}

fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct Catalog {
    tools: Vec<Tool>,
    resources: Vec<Resource>,
}

/// A connector constructed for one tenant and connector, shared by every transport
/// that resolves to the same key.
pub struct BackendInstance {
    key: TenantConnectorKey,
    connector_type: String,
    connector: Arc<dyn Connector>,
    directory: Arc<dyn TenantDirectory>,
    // Shared by all sessions using this instance. Last write wins.
    user_token: RwLock<Option<SecretString>>,
    catalog: OnceCell<Catalog>,
}

impl BackendInstance {
    /// Wraps a constructed connector.
    pub fn new(
        key: TenantConnectorKey,
        connector_type: impl Into<String>,
        connector: Arc<dyn Connector>,
        directory: Arc<dyn TenantDirectory>,
    ) -> Self {
        Self {
            key,
            connector_type: connector_type.into(),
            connector,
            directory,
            user_token: RwLock::new(None),
            catalog: OnceCell::new(),
        }
    }

    /// The pool key of this instance.
    pub fn key(&self) -> &TenantConnectorKey {
        &self.key
    }

    /// Tenant id.
    pub fn tenant(&self) -> &str {
        &self.key.tenant
    }

    /// Connector id.
    pub fn connector(&self) -> &str {
        &self.key.connector
    }

    /// Connector type.
    pub fn connector_type(&self) -> &str {
        &self.connector_type
    }

    /// Verifies that the tenant and connector still exist and are active.
    pub async fn initialize(&self) -> bool {
        let active = self.directory.is_active(self.tenant(), self.connector()).await;

        if !active {
            log::debug!("Backend {} refused to initialize: tenant or connector inactive", self.key);
        }

        active
    }

    /// Attaches an end-user token, replacing the previous one.
    pub fn set_user_token(&self, token: Option<SecretString>) {
        *self.user_token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// The currently attached end-user token.
    pub fn user_token(&self) -> Option<SecretString> {
        self.user_token.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn catalog(&self) -> anyhow::Result<&Catalog> {
        self.catalog
            .get_or_try_init(|| async {
                log::debug!("Building tool and resource catalog for backend {}", self.key);

                let tools = self.connector.get_tools().await?;
                let resources = self.connector.get_resources().await?;

                Ok::<_, anyhow::Error>(Catalog { tools, resources })
            })
            .await
    }

    /// The tools of the connector, fetched once per instance.
    pub async fn list_tools(&self) -> anyhow::Result<Vec<Tool>> {
        Ok(self.catalog().await?.tools.clone())
    }

    /// The resources of the connector, fetched once per instance.
    pub async fn list_resources(&self) -> anyhow::Result<Vec<Resource>> {
        Ok(self.catalog().await?.resources.clone())
    }

    /// Runs a tool on the connector.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        context: ToolContext,
    ) -> anyhow::Result<CallToolResult> {
        self.connector.execute_tool(name, arguments, context).await
    }

    /// Reads a resource from the connector.
    pub async fn read_resource(&self, uri: &str, context: ToolContext) -> anyhow::Result<ReadResourceResult> {
        self.connector.read_resource(uri, context).await
    }
}

impl fmt::Debug for BackendInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendInstance")
            .field("key", &self.key)
            .field("connector_type", &self.connector_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::TenantConnectorKey;

    #[test]
    fn keys_fingerprint_tokens() {
        let token = SecretString::from("user-token");
        let key = TenantConnectorKey::new("acme", "github", Some(&token));

        let fingerprint = key.token_fingerprint.as_deref().unwrap();
        assert_eq!(fingerprint.len(), 64);
        assert!(!fingerprint.contains("user-token"));

        assert_eq!(key, TenantConnectorKey::new("acme", "github", Some(&token)));
        assert_ne!(key, TenantConnectorKey::new("acme", "github", None));
        assert_ne!(
            key,
            TenantConnectorKey::new("acme", "github", Some(&SecretString::from("other")))
        );

        assert!(key.matches("acme", "github"));
        assert!(!key.matches("acme", "jira"));
    }

    #[test]
    fn key_display_never_shows_the_full_fingerprint() {
        let key = TenantConnectorKey::new("acme", "github", None);
        assert_eq!(key.to_string(), "acme/github");

        let token = SecretString::from("user-token");
        let key = TenantConnectorKey::new("acme", "github", Some(&token));
        let display = key.to_string();

        assert!(display.starts_with("acme/github#"));
        assert_eq!(display.len(), "acme/github#".len() + 8);
    }
}
