//! In-process connectors registered with the test server.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use mcp::{Connector, ConnectorFactory, ConnectorSpec, ToolContext};
use rmcp::model::{
    CallToolResult, Content, JsonObject, RawResource, ReadResourceResult, Resource, ResourceContents, Tool,
};
use secrecy::ExposeSecret;
use serde_json::json;

/// Tools:
///
/// - `echo`: returns its `text` argument
/// - `whoami`: returns the user token attached to the backend, or `anonymous`
/// - `credential`: returns the tenant credential the connector was built with
/// - `progress`: sends `notifications/progress` to the calling session
/// - `announce`: broadcasts `notifications/message` to every client of the connector
/// - `sleep`: waits `millis` milliseconds
/// - `explode`: fails
///
/// One resource: `notes://welcome`.
pub struct ScriptedConnector {
    tenant: String,
    credential: Option<String>,
}

fn tool(name: &'static str, description: &'static str) -> Tool {
    let mut schema = JsonObject::new();
    schema.insert("type".to_string(), json!("object"));

    Tool::new(name, description, Arc::new(schema))
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn get_tools(&self) -> anyhow::Result<Vec<Tool>> {
        Ok(vec![
            tool("echo", "Echoes the text argument"),
            tool("whoami", "Reports the end-user token"),
            tool("credential", "Reports the tenant credential"),
            tool("progress", "Sends a progress notification to the caller"),
            tool("announce", "Broadcasts a message to every client"),
            tool("sleep", "Waits for the given number of milliseconds"),
            tool("explode", "Always fails"),
        ])
    }

    async fn get_resources(&self) -> anyhow::Result<Vec<Resource>> {
        Ok(vec![Resource::new(RawResource::new("notes://welcome", "welcome"), None)])
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        context: ToolContext,
    ) -> anyhow::Result<CallToolResult> {
        let argument = |key: &str| arguments.as_ref().and_then(|arguments| arguments.get(key)).cloned();

        let text = match name {
            "echo" => argument("text")
                .and_then(|text| text.as_str().map(str::to_string))
                .unwrap_or_default(),
            "whoami" => context
                .user_token
                .as_ref()
                .map(|token| token.expose_secret().to_string())
                .unwrap_or_else(|| "anonymous".to_string()),
            "credential" => self.credential.clone().unwrap_or_else(|| "none".to_string()),
            "progress" => {
                context
                    .push
                    .notify("notifications/progress", Some(json!({"progressToken": "p1", "progress": 1})));

                "progress sent".to_string()
            }
            "announce" => {
                context.push.broadcast(
                    "notifications/message",
                    Some(json!({"level": "info", "data": format!("hello from {}", self.tenant)})),
                );

                "announced".to_string()
            }
            "sleep" => {
                let millis = argument("millis").and_then(|millis| millis.as_u64()).unwrap_or(100);
                tokio::time::sleep(Duration::from_millis(millis)).await;

                format!("slept {millis}ms")
            }
            "explode" => anyhow::bail!("the scripted service exploded"),
            other => anyhow::bail!("unknown tool '{other}'"),
        };

        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    async fn read_resource(&self, uri: &str, context: ToolContext) -> anyhow::Result<ReadResourceResult> {
        anyhow::ensure!(uri == "notes://welcome", "unknown resource '{uri}'");

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(format!("welcome, {}", context.tenant), uri)],
        })
    }
}

/// Builds [`ScriptedConnector`]s and counts the constructions.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    constructions: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl ScriptedFactory {
    /// Makes every construction take `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// How many connectors were built so far.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectorFactory for ScriptedFactory {
    async fn create(&self, spec: &ConnectorSpec) -> anyhow::Result<Arc<dyn Connector>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.constructions.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(ScriptedConnector {
            tenant: spec.tenant.clone(),
            credential: spec.credential.as_ref().map(|credential| credential.expose_secret().to_string()),
        }))
    }
}
