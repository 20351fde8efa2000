//! A real MCP server the gateway connects to as a streamable-http downstream.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::Request,
    http::{StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::Response,
};
use rmcp::{
    handler::server::ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, ErrorCode, ErrorData, JsonObject, ListResourcesResult,
        ListToolsResult, PaginatedRequestParam, RawResource, ReadResourceRequestParam, ReadResourceResult, Resource,
        ResourceContents, ServerCapabilities, ServerInfo, Tool,
    },
    service::{RequestContext, RoleServer},
    transport::streamable_http_server::{
        StreamableHttpServerConfig, StreamableHttpService, session::never::NeverSessionManager,
    },
};
use serde_json::json;
use tokio::net::TcpListener;

/// An MCP server with an `adder` tool and a `docs://changelog` resource.
#[derive(Clone, Default)]
pub struct TestService {
    required_token: Option<String>,
}

impl TestService {
    /// Refuses requests without `Authorization: Bearer <token>`.
    pub fn with_required_token(token: impl Into<String>) -> Self {
        Self {
            required_token: Some(token.into()),
        }
    }

    /// Serves the MCP endpoint at `http://<address>/mcp`.
    pub async fn spawn(self) -> SocketAddr {
        let required_token = self.required_token.clone();

        let service = StreamableHttpService::new(
            move || Ok(self.clone()),
            Arc::new(NeverSessionManager::default()),
            StreamableHttpServerConfig {
                sse_keep_alive: Some(Duration::from_secs(5)),
                stateful_mode: false,
            },
        );

        let app = Router::new()
            .route_service("/mcp", service)
            .layer(middleware::from_fn(move |request: Request, next: Next| {
                let required_token = required_token.clone();
                async move { authorize(request, next, required_token).await }
            }));

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        address
    }
}

async fn authorize(request: Request, next: Next, required_token: Option<String>) -> Result<Response, StatusCode> {
    let Some(required_token) = required_token else {
        return Ok(next.run(request).await);
    };

    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match authorization {
        Some(value) if value == format!("Bearer {required_token}") => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

fn adder() -> Tool {
    let schema = json!({
        "type": "object",
        "properties": {
            "a": { "type": "number" },
            "b": { "type": "number" }
        },
        "required": ["a", "b"]
    });

    let schema: JsonObject = serde_json::from_value(schema).unwrap();

    Tool::new("adder", "Adds two numbers", Arc::new(schema))
}

impl ServerHandler for TestService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().enable_resources().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _: Option<PaginatedRequestParam>,
        _: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: vec![adder()],
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        if params.name != "adder" {
            return Err(ErrorData {
                code: ErrorCode(-32601),
                message: format!("Tool '{}' not found", params.name).into(),
                data: None,
            });
        }

        let number = |key: &str| {
            params
                .arguments
                .as_ref()
                .and_then(|arguments| arguments.get(key))
                .and_then(|value| value.as_i64())
                .ok_or_else(|| ErrorData {
                    code: ErrorCode(-32602),
                    message: format!("Missing or invalid parameter '{key}'").into(),
                    data: None,
                })
        };

        let (a, b) = (number("a")?, number("b")?);

        Ok(CallToolResult::success(vec![Content::text(format!("{a} + {b} = {}", a + b))]))
    }

    async fn list_resources(
        &self,
        _: Option<PaginatedRequestParam>,
        _: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        Ok(ListResourcesResult {
            resources: vec![Resource::new(RawResource::new("docs://changelog", "changelog"), None)],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        params: ReadResourceRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text("v1: first release", params.uri)],
        })
    }
}
