//! The built-in connector: an MCP client to a downstream server started per backend instance.

use std::{process::Stdio, sync::Arc};

use async_trait::async_trait;
use config::Downstream;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use rmcp::{
    RoleClient, ServiceExt,
    model::{CallToolRequestParam, CallToolResult, JsonObject, ReadResourceRequestParam, ReadResourceResult, Resource, Tool},
    service::RunningService,
    transport::{
        StreamableHttpClientTransport, TokioChildProcess, streamable_http_client::StreamableHttpClientTransportConfig,
    },
};
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;

use crate::connector::{Connector, ConnectorFactory, ConnectorSpec, ToolContext};

/// Builds [`DownstreamConnector`]s from connectors that configure `cmd` or `url`.
pub(crate) struct DownstreamFactory;

#[async_trait]
impl ConnectorFactory for DownstreamFactory {
    async fn create(&self, spec: &ConnectorSpec) -> anyhow::Result<Arc<dyn Connector>> {
        let connector = DownstreamConnector::connect(spec).await?;
        Ok(Arc::new(connector))
    }
}

/// Proxies tools and resources of a downstream MCP server.
pub struct DownstreamConnector {
    name: String,
    service: RunningService<RoleClient, ()>,
}

impl DownstreamConnector {
    /// Starts or connects to the downstream server of `spec` and completes the MCP handshake.
    pub async fn connect(spec: &ConnectorSpec) -> anyhow::Result<Self> {
        let name = format!("{}/{}", spec.tenant, spec.connector);

        let Some(downstream) = &spec.downstream else {
            anyhow::bail!("Connector '{name}' has no downstream server configured");
        };

        let service = match downstream {
            Downstream::Stdio {
                cmd,
                env,
                cwd,
                credential_env,
            } => {
                log::debug!("Starting stdio downstream for connector '{name}'");

                let Some((executable, args)) = cmd.split_first() else {
                    anyhow::bail!("Connector '{name}' has an empty command");
                };

                let mut command = Command::new(executable);
                command.args(args);

                for (key, value) in env {
                    command.env(key, value);
                }

                if let Some(cwd) = cwd {
                    command.current_dir(cwd);
                }

                if let Some((variable, credential)) = credential_env.as_ref().zip(spec.credential.as_ref()) {
                    command.env(variable, credential.expose_secret());
                }

                let transport = TokioChildProcess::builder(command)
                    .stderr(Stdio::inherit())
                    .spawn()
                    .map(|(transport, _stderr)| transport)?;

                ().serve(transport).await?
            }
            Downstream::Http { url } => {
                log::debug!("Connecting to streamable-http downstream at '{url}' for connector '{name}'");

                let client = http_client(spec.credential.as_ref())?;
                let config = StreamableHttpClientTransportConfig::with_uri(url.to_string());
                let transport = StreamableHttpClientTransport::with_client(client, config);

                ().serve(transport).await?
            }
        };

        log::debug!("Downstream for connector '{name}' is ready");

        Ok(Self { name, service })
    }
}

#[async_trait]
impl Connector for DownstreamConnector {
    async fn get_tools(&self) -> anyhow::Result<Vec<Tool>> {
        log::debug!("Requesting tool list from downstream '{}'", self.name);
        Ok(self.service.list_tools(Default::default()).await?.tools)
    }

    async fn get_resources(&self) -> anyhow::Result<Vec<Resource>> {
        log::debug!("Requesting resource list from downstream '{}'", self.name);
        Ok(self.service.list_resources(Default::default()).await?.resources)
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        _context: ToolContext,
    ) -> anyhow::Result<CallToolResult> {
        log::debug!("Invoking tool '{name}' on downstream '{}'", self.name);

        let params = CallToolRequestParam {
            name: name.to_string().into(),
            arguments,
        };

        Ok(self.service.call_tool(params).await?)
    }

    async fn read_resource(&self, uri: &str, _context: ToolContext) -> anyhow::Result<ReadResourceResult> {
        log::debug!("Reading resource '{uri}' from downstream '{}'", self.name);

        let params = ReadResourceRequestParam { uri: uri.to_string() };

        Ok(self.service.read_resource(params).await?)
    }
}

fn http_client(credential: Option<&SecretString>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();

    if let Some(credential) = credential {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.expose_secret()))?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);

        builder = builder.default_headers(headers);
    }

    Ok(builder.build()?)
}
