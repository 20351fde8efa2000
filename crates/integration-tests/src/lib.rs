//! Helpers to run Relay in-process and talk to it over every transport.

mod connectors;
mod downstream;

use std::{net::SocketAddr, time::Duration};

use config::Config;
use eventsource_stream::{Event, Eventsource};
use futures_util::{SinkExt, Stream, StreamExt};
use mcp::{ConnectorFactory, ConnectorRegistry};
use serde_json::{Value, json};
use server::ServeConfig;
use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tokio_util::sync::CancellationToken;

pub use connectors::{ScriptedConnector, ScriptedFactory};
pub use downstream::TestService;

/// How long a test waits for a message before giving up.
pub const WAIT: Duration = Duration::from_secs(5);

/// Builds a [`TestServer`] with custom connector factories.
#[derive(Default)]
pub struct TestServerBuilder {
    registry: ConnectorRegistry,
}

impl TestServerBuilder {
    /// Registers a factory for a connector type.
    pub fn connector(mut self, connector_type: &str, factory: impl ConnectorFactory + 'static) -> Self {
        self.registry.register(connector_type, factory);
        self
    }

    /// Starts the server with the given TOML configuration.
    pub async fn build(self, config_toml: &str) -> TestServer {
        let config: Config = toml::from_str(config_toml).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let shutdown = CancellationToken::new();

        let serve_config = ServeConfig {
            listen_address: address,
            config,
            registry: self.registry,
            shutdown: shutdown.clone(),
        };

        tokio::spawn(async move {
            if let Err(e) = server::serve(serve_config).await {
                eprintln!("Server failed: {e}");
            }
        });

        let client = TestClient::new(format!("http://{address}"));

        for _ in 0..50 {
            if timeout(Duration::from_millis(100), client.raw_get("/")).await.is_ok_and(|r| r.is_ok()) {
                break;
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        TestServer {
            client,
            address,
            shutdown,
        }
    }
}

/// A running Relay server. Stops when dropped.
pub struct TestServer {
    /// HTTP client pointed at the server.
    pub client: TestClient,
    /// Listen address.
    pub address: SocketAddr,
    shutdown: CancellationToken,
}

impl TestServer {
    /// A server with the scripted connector registered as `scripted`.
    pub async fn scripted(config_toml: &str) -> (Self, ScriptedFactory) {
        let factory = ScriptedFactory::default();
        let server = Self::builder().connector("scripted", factory.clone()).build(config_toml).await;

        (server, factory)
    }

    /// Starts building a server.
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder::default()
    }

    /// A streamable HTTP client for a tenant and connector under `/mcp`.
    pub fn mcp(&self, tenant: &str, connector: &str) -> McpClient {
        McpClient {
            client: self.client.clone(),
            path: format!("/mcp/{tenant}/{connector}"),
            session_id: None,
            user_token: None,
        }
    }

    /// Opens a WebSocket to a tenant and connector under `/mcp`.
    pub async fn websocket(&self, tenant: &str, connector: &str) -> WsClient {
        let url = format!("ws://{}/mcp/{tenant}/{connector}/ws", self.address);
        let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        WsClient { stream }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Thin reqwest wrapper.
#[derive(Clone)]
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Full URL of a path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// A request builder for any method.
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, self.url(path))
    }

    async fn raw_get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.get(self.url(path)).send().await
    }

    /// GET a path.
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.raw_get(path).await.unwrap()
    }

    /// POST a JSON body to a path.
    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(body).send().await.unwrap()
    }
}

/// A JSON-RPC request.
pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// An `initialize` request for the newest protocol version.
pub fn initialize(id: u64) -> Value {
    request(
        id,
        "initialize",
        json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": { "name": "integration-tests", "version": "1.0.0" }
        }),
    )
}

/// A `tools/call` request.
pub fn call_tool(id: u64, name: &str, arguments: Value) -> Value {
    request(id, "tools/call", json!({ "name": name, "arguments": arguments }))
}

/// A streamable HTTP MCP client that carries its session id.
pub struct McpClient {
    client: TestClient,
    path: String,
    session_id: Option<String>,
    user_token: Option<String>,
}

impl McpClient {
    /// Sends the user token header with every request.
    pub fn with_user_token(mut self, token: &str) -> Self {
        self.user_token = Some(token.to_string());
        self
    }

    /// The session established by `initialize`.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The endpoint path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn builder(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, &self.path);

        if let Some(session_id) = &self.session_id {
            builder = builder.header("mcp-session-id", session_id);
        }

        if let Some(token) = &self.user_token {
            builder = builder.header("x-user-token", token);
        }

        builder
    }

    /// Posts a message and returns the raw response, remembering a returned session id.
    pub async fn send(&mut self, message: &Value) -> reqwest::Response {
        let response = self.builder(reqwest::Method::POST).json(message).send().await.unwrap();

        if let Some(session_id) = response.headers().get("mcp-session-id") {
            self.session_id = Some(session_id.to_str().unwrap().to_string());
        }

        response
    }

    /// Posts a message and returns the JSON body.
    pub async fn call(&mut self, message: &Value) -> Value {
        let response = self.send(message).await;
        assert_eq!(response.status(), 200, "unexpected status for {message}");

        response.json().await.unwrap()
    }

    /// Runs `initialize` and returns its result.
    pub async fn initialize(&mut self) -> Value {
        self.call(&initialize(0)).await
    }

    /// Terminates the session.
    pub async fn delete(&self) -> reqwest::Response {
        self.builder(reqwest::Method::DELETE).send().await.unwrap()
    }

    /// Opens the server-initiated event stream, resuming after `last_event_id`.
    pub async fn events(&self, last_event_id: Option<u64>) -> impl Stream<Item = Event> + Unpin + use<> {
        let mut builder = self.builder(reqwest::Method::GET);

        if let Some(last_event_id) = last_event_id {
            builder = builder.header("last-event-id", last_event_id.to_string());
        }

        let response = builder.send().await.unwrap();
        assert_eq!(response.status(), 200);

        response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }
}

/// Reads the next `message` event of an SSE stream, skipping keepalives.
pub async fn next_message(events: &mut (impl Stream<Item = Event> + Unpin)) -> Event {
    timeout(WAIT, async {
        loop {
            let event = events.next().await.expect("event stream ended");

            if event.event == "message" || event.event == "endpoint" {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for an event")
}

/// Reads the raw body of a streaming response until it contains `needle`.
pub async fn read_until(response: &mut reqwest::Response, needle: &str) -> String {
    let mut text = String::new();

    timeout(WAIT, async {
        while !text.contains(needle) {
            let chunk = response.chunk().await.unwrap().expect("stream ended");
            text.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}, received {text:?}"));

    text
}

/// A WebSocket MCP client.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl WsClient {
    /// Sends a JSON message.
    pub async fn send(&mut self, message: &Value) {
        self.stream.send(Message::text(message.to_string())).await.unwrap();
    }

    /// Sends raw text.
    pub async fn send_text(&mut self, text: &str) {
        self.stream.send(Message::text(text.to_string())).await.unwrap();
    }

    /// Receives the next JSON message.
    pub async fn recv(&mut self) -> Value {
        timeout(WAIT, async {
            loop {
                match self.stream.next().await.expect("websocket closed").unwrap() {
                    Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                    Message::Close(frame) => panic!("websocket closed: {frame:?}"),
                    _ => continue,
                }
            }
        })
        .await
        .expect("timed out waiting for a websocket message")
    }

    /// Sends a request and waits for the message answering it, collecting anything
    /// received before it.
    pub async fn call(&mut self, message: &Value) -> (Value, Vec<Value>) {
        self.send(message).await;

        let mut before = Vec::new();

        loop {
            let received = self.recv().await;

            if received.get("id") == message.get("id") && received.get("method").is_none() {
                return (received, before);
            }

            before.push(received);
        }
    }

    /// Closes the connection.
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
