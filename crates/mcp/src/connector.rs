//! Connector plugins and the registry that builds them per backend instance.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use config::Downstream;
use rmcp::model::{CallToolResult, JsonObject, ReadResourceResult, Resource, Tool};
use secrecy::SecretString;

use crate::{downstream::DownstreamFactory, outbound::ServerPush};

/// A plugin exposing the tools and resources of one external service.
///
/// Errors returned from any method are reported to the client as internal errors of
/// the single request that triggered them.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The tools this connector offers.
    async fn get_tools(&self) -> anyhow::Result<Vec<Tool>>;

    /// The resources this connector offers.
    async fn get_resources(&self) -> anyhow::Result<Vec<Resource>>;

    /// Runs a tool.
    async fn execute_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        context: ToolContext,
    ) -> anyhow::Result<CallToolResult>;

    /// Reads a resource.
    async fn read_resource(&self, uri: &str, context: ToolContext) -> anyhow::Result<ReadResourceResult>;
}

/// Per-call information handed to a connector.
#[derive(Clone)]
pub struct ToolContext {
    /// Tenant id.
    pub tenant: String,
    /// Connector id.
    pub connector: String,
    /// Session the call arrived on, if any.
    pub session_id: Option<String>,
    /// End-user token attached to the backend at the time of the call.
    pub user_token: Option<SecretString>,
    /// Sends server-initiated messages to the clients of this tenant and connector.
    pub push: ServerPush,
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("tenant", &self.tenant)
            .field("connector", &self.connector)
            .field("session_id", &self.session_id)
            .field("user_token", &self.user_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// Everything needed to build a connector for one tenant.
#[derive(Debug, Clone)]
pub struct ConnectorSpec {
    /// Tenant id.
    pub tenant: String,
    /// Connector id.
    pub connector: String,
    /// Connector type, consulted by the tool policy and the registry.
    pub connector_type: String,
    /// Credential configured for the tenant.
    pub credential: Option<SecretString>,
    /// Downstream MCP server, when the connector proxies one.
    pub downstream: Option<Downstream>,
}

/// Builds connectors.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    /// Builds a connector for the given tenant and connector.
    async fn create(&self, spec: &ConnectorSpec) -> anyhow::Result<Arc<dyn Connector>>;
}

#[async_trait]
impl<F> ConnectorFactory for F
where
    F: Fn(&ConnectorSpec) -> anyhow::Result<Arc<dyn Connector>> + Send + Sync,
{
    async fn create(&self, spec: &ConnectorSpec) -> anyhow::Result<Arc<dyn Connector>> {
        self(spec)
    }
}

/// Maps connector types to factories.
///
/// Connectors with a configured downstream and no registered factory are served by
/// the built-in downstream MCP client.
#[derive(Clone)]
pub struct ConnectorRegistry {
    factories: HashMap<String, Arc<dyn ConnectorFactory>>,
    downstream: Arc<dyn ConnectorFactory>,
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorRegistry {
    /// Creates a registry that only knows downstream connectors.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            downstream: Arc::new(DownstreamFactory),
        }
    }

    /// Registers a factory for a connector type, replacing any previous one.
    pub fn register(&mut self, connector_type: impl Into<String>, factory: impl ConnectorFactory + 'static) {
        self.factories.insert(connector_type.into(), Arc::new(factory));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, connector_type: impl Into<String>, factory: impl ConnectorFactory + 'static) -> Self {
        self.register(connector_type, factory);
        self
    }

    /// Builds the connector described by `spec`.
    pub async fn create(&self, spec: &ConnectorSpec) -> anyhow::Result<Arc<dyn Connector>> {
        if let Some(factory) = self.factories.get(&spec.connector_type) {
            log::debug!(
                "Creating '{}' connector for {}/{}",
                spec.connector_type,
                spec.tenant,
                spec.connector
            );

            return factory.create(spec).await;
        }

        if spec.downstream.is_some() {
            return self.downstream.create(spec).await;
        }

        anyhow::bail!("No connector registered for type '{}'", spec.connector_type)
    }
}
