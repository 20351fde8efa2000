use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use rmcp::model::{
    CallToolResult, Content, JsonObject, RawResource, ReadResourceResult, Resource, ResourceContents, Tool,
};
use secrecy::ExposeSecret;
use serde_json::json;

use crate::{
    backend::{BackendInstance, TenantConnectorKey},
    connector::{Connector, ConnectorSpec, ToolContext},
    pool::{BackendFactory, PoolError},
    tenant::{TenantDirectory, TenantLookup},
};

/// Tools: `echo`, `fail`, `notify` and `whoami`. One resource: `memo://readme`.
#[derive(Default)]
pub struct EchoConnector {
    pub executions: AtomicUsize,
}

fn tool(name: &'static str, description: &'static str) -> Tool {
    let schema = json!({"type": "object"});
    let serde_json::Value::Object(schema) = schema else {
        unreachable!()
    };

    Tool::new(name, description, Arc::new(schema))
}

#[async_trait]
impl Connector for EchoConnector {
    async fn get_tools(&self) -> anyhow::Result<Vec<Tool>> {
        Ok(vec![
            tool("echo", "Echoes the text argument"),
            tool("fail", "Always fails"),
            tool("notify", "Sends a progress notification"),
            tool("whoami", "Reports the attached user token"),
        ])
    }

    async fn get_resources(&self) -> anyhow::Result<Vec<Resource>> {
        Ok(vec![Resource::new(RawResource::new("memo://readme", "readme"), None)])
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        context: ToolContext,
    ) -> anyhow::Result<CallToolResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);

        match name {
            "echo" => {
                let text = arguments
                    .as_ref()
                    .and_then(|arguments| arguments.get("text"))
                    .and_then(|text| text.as_str())
                    .unwrap_or_default()
                    .to_string();

                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            "notify" => {
                context
                    .push
                    .notify("notifications/progress", Some(json!({"progress": 1, "total": 1})));

                Ok(CallToolResult::success(vec![Content::text("notified")]))
            }
            "whoami" => {
                let token = context
                    .user_token
                    .as_ref()
                    .map(|token| token.expose_secret().to_string())
                    .unwrap_or_else(|| "anonymous".to_string());

                Ok(CallToolResult::success(vec![Content::text(token)]))
            }
            "fail" => anyhow::bail!("upstream service exploded"),
            other => anyhow::bail!("unknown tool '{other}'"),
        }
    }

    async fn read_resource(&self, uri: &str, _: ToolContext) -> anyhow::Result<ReadResourceResult> {
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text("hello from the readme", uri)],
        })
    }
}

/// A directory where every tenant exists and activity is switchable.
pub struct StaticDirectory {
    pub active: AtomicBool,
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self {
            active: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl TenantDirectory for StaticDirectory {
    async fn lookup(&self, tenant: &str, connector: &str) -> anyhow::Result<TenantLookup> {
        Ok(TenantLookup::Found(ConnectorSpec {
            tenant: tenant.to_string(),
            connector: connector.to_string(),
            connector_type: connector.to_string(),
            credential: None,
            downstream: None,
        }))
    }

    async fn is_active(&self, _: &str, _: &str) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Builds echo backends and counts how often it did.
#[derive(Default)]
pub struct CountingFactory {
    delay: Option<Duration>,
    constructions: AtomicUsize,
    pub directory: Arc<StaticDirectory>,
}

impl CountingFactory {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendFactory for CountingFactory {
    async fn create(&self, key: &TenantConnectorKey) -> Result<Arc<BackendInstance>, PoolError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.constructions.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(BackendInstance::new(
            key.clone(),
            key.connector.clone(),
            Arc::new(EchoConnector::default()),
            self.directory.clone(),
        )))
    }
}

/// Fails the first construction, succeeds afterwards.
#[derive(Default)]
pub struct FailingOnceFactory {
    attempts: AtomicUsize,
}

impl FailingOnceFactory {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendFactory for FailingOnceFactory {
    async fn create(&self, key: &TenantConnectorKey) -> Result<Arc<BackendInstance>, PoolError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(anyhow::anyhow!("credentials could not be loaded").into());
        }

        Ok(Arc::new(BackendInstance::new(
            key.clone(),
            key.connector.clone(),
            Arc::new(EchoConnector::default()),
            Arc::new(StaticDirectory::default()),
        )))
    }
}
