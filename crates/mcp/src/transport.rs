//! The transport state machine shared by the WebSocket, streamable HTTP and legacy SSE
//! transports.
//!
//! A transport starts unbound, binds a backend on `initialize` and then dispatches
//! requests to it. Requests that need the backend are returned as futures, so a
//! connection can run them concurrently while `initialize` and token updates stay
//! ordered.

use std::{fmt, sync::Arc};

use futures_util::{FutureExt, future::BoxFuture};
use rmcp::model::{CallToolResult, Content, JsonObject};
use secrecy::SecretString;
use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    backend::{BackendInstance, TenantConnectorKey},
    connector::ToolContext,
    gateway::Gateway,
    outbound::ServerPush,
    protocol::{self, ErrorObject, Incoming, Method, Notification, Payload, Request},
    session::Session,
};

const TENANT_UNAVAILABLE: &str = "Tenant or connector not found or inactive";

/// The wire a transport speaks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Full-duplex WebSocket connection.
    WebSocket,
    /// Streamable HTTP: one transport per request.
    StreamableHttp,
    /// Deprecated SSE stream with a separate message endpoint.
    LegacySse,
}

/// Lifecycle of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No backend bound yet. Only `initialize` and `ping` succeed.
    Unbound,
    /// `initialize` is resolving a backend.
    Initializing,
    /// A backend is bound.
    Ready,
    /// The transport was closed.
    Closed,
}

/// How a message was handled.
pub enum Routed {
    /// Handled synchronously. `None` for notifications and client responses.
    Reply(Option<Value>),
    /// A request running against the backend; resolves to its response.
    Deferred(BoxFuture<'static, Value>),
}

impl fmt::Debug for Routed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reply(reply) => f.debug_tuple("Reply").field(reply).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

struct Binding {
    backend: Arc<BackendInstance>,
    version: &'static str,
}

/// One client connection (WebSocket, legacy SSE) or one HTTP request.
pub struct Transport {
    gateway: Gateway,
    kind: TransportKind,
    tenant: String,
    connector: String,
    user_token: Option<SecretString>,
    state: TransportState,
    binding: Option<Binding>,
    session_id: Option<String>,
    connection_id: Option<String>,
    stateless: bool,
}

impl Transport {
    /// Creates an unbound transport for a tenant and connector.
    pub fn new(gateway: Gateway, kind: TransportKind, tenant: impl Into<String>, connector: impl Into<String>) -> Self {
        Self {
            gateway,
            kind,
            tenant: tenant.into(),
            connector: connector.into(),
            user_token: None,
            state: TransportState::Unbound,
            binding: None,
            session_id: None,
            connection_id: None,
            stateless: false,
        }
    }

    /// Creates a transport bound to an existing session.
    pub fn from_session(gateway: Gateway, kind: TransportKind, session: Session) -> Self {
        Self {
            gateway,
            kind,
            tenant: session.tenant,
            connector: session.connector,
            user_token: None,
            state: TransportState::Ready,
            binding: Some(Binding {
                backend: session.backend,
                version: session.negotiated_version,
            }),
            session_id: Some(session.id),
            connection_id: None,
            stateless: false,
        }
    }

    /// Resolves the backend from the pool on the first request that needs one, as if
    /// `initialize` had negotiated the newest protocol version.
    pub fn stateless(mut self) -> Self {
        self.stateless = true;
        self
    }

    /// Scopes server-initiated messages of this connection's calls to the connection.
    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    /// Scopes the pooled backend to an end-user token.
    pub fn with_user_token(mut self, token: Option<SecretString>) -> Self {
        self.user_token = token;
        self
    }

    /// Current state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// The session this transport is bound to.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The scope notifications emitted during this transport's calls are delivered to.
    pub fn push_scope(&self) -> Option<&str> {
        self.session_id.as_deref().or(self.connection_id.as_deref())
    }

    /// The negotiated protocol version, once bound.
    pub fn protocol_version(&self) -> Option<&'static str> {
        self.binding.as_ref().map(|binding| binding.version)
    }

    /// The bound backend.
    pub fn backend(&self) -> Option<&Arc<BackendInstance>> {
        self.binding.as_ref().map(|binding| &binding.backend)
    }

    /// Marks the transport closed. Later requests are refused.
    pub fn close(&mut self) {
        if self.state != TransportState::Closed {
            log::debug!("Transport {:?} for {}/{} closed", self.kind, self.tenant, self.connector);
        }

        self.state = TransportState::Closed;
        self.binding = None;
    }

    /// Handles one message and waits for its response.
    pub async fn handle(&mut self, message: Value) -> Option<Value> {
        match self.route(message).await {
            Routed::Reply(reply) => reply,
            Routed::Deferred(response) => Some(detach(response).await),
        }
    }

    /// Handles a single message or a batch.
    ///
    /// Notifications never take a slot in the result. A batch with at least one
    /// request yields an array of the request responses, in request order. Returns
    /// `None` when nothing needs to be sent back.
    pub async fn handle_payload(&mut self, payload: Payload) -> Option<Value> {
        match payload {
            Payload::Single(message) => self.handle(message).await,
            Payload::Batch(messages) => {
                let mut pending = Vec::with_capacity(messages.len());

                for message in messages {
                    match self.route(message).await {
                        Routed::Reply(Some(response)) => pending.push(futures_util::future::ready(response).boxed()),
                        Routed::Reply(None) => (),
                        Routed::Deferred(response) => pending.push(detach(response)),
                    }
                }

                if pending.is_empty() {
                    return None;
                }

                Some(Value::Array(futures_util::future::join_all(pending).await))
            }
        }
    }

    /// Classifies a message and either answers it or returns the backend call to run.
    pub async fn route(&mut self, message: Value) -> Routed {
        match protocol::classify(message) {
            Incoming::Request(request) => self.route_request(request).await,
            Incoming::Notification(notification) => {
                self.handle_notification(notification);
                Routed::Reply(None)
            }
            Incoming::Response { id } => {
                log::debug!("Acknowledged client response with id {id}");
                Routed::Reply(None)
            }
            Incoming::Malformed { id, reason } => {
                log::debug!("Rejected malformed message: {reason}");
                Routed::Reply(Some(protocol::error_envelope(id, ErrorObject::invalid_request(reason))))
            }
        }
    }

    fn handle_notification(&mut self, notification: Notification) {
        match notification.method.as_str() {
            "auth/setUserToken" if self.kind == TransportKind::WebSocket => {
                if let Err(error) = self.set_user_token(notification.params.as_ref()) {
                    log::debug!("Ignored invalid auth/setUserToken notification: {}", error.message);
                }
            }
            method => log::debug!("Received notification {method}"),
        }
    }

    async fn route_request(&mut self, request: Request) -> Routed {
        let Request { id, method, params } = request;

        let Some(dispatch) = Method::parse(&method) else {
            return reply_error(id, ErrorObject::method_not_found(&method));
        };

        match dispatch {
            Method::Ping => Routed::Reply(Some(protocol::success_envelope(id, json!({})))),
            Method::Initialize => {
                let response = match self.initialize(params.as_ref()).await {
                    Ok(result) => protocol::success_envelope(id, result),
                    Err(error) => protocol::error_envelope(Some(id), error),
                };

                Routed::Reply(Some(response))
            }
            Method::SetUserToken if self.kind == TransportKind::WebSocket => {
                match self.set_user_token(params.as_ref()) {
                    Ok(()) => Routed::Reply(Some(protocol::success_envelope(id, json!({})))),
                    Err(error) => reply_error(id, error),
                }
            }
            Method::SetUserToken => reply_error(id, ErrorObject::method_not_found(&method)),
            method => match self.resolve_backend().await {
                Ok(backend) => Routed::Deferred(self.dispatch(id, method, params, backend)),
                Err(error) => reply_error(id, error),
            },
        }
    }

    async fn initialize(&mut self, params: Option<&Value>) -> Result<Value, ErrorObject> {
        if self.state == TransportState::Closed {
            return Err(ErrorObject::tenant_unavailable("Transport is closed"));
        }

        if self.binding.is_some() {
            return Err(ErrorObject::invalid_request("Invalid Request: already initialized"));
        }

        let requested = match params.and_then(|params| params.get("protocolVersion")) {
            None => protocol::LATEST_VERSION,
            Some(Value::String(version)) => version.as_str(),
            Some(_) => return Err(ErrorObject::invalid_params("protocolVersion must be a string")),
        };

        let Some(version) = protocol::negotiate(requested) else {
            let mut error = ErrorObject::invalid_params(format!("Unsupported protocol version: {requested}"));
            error.data = Some(json!({ "supported": protocol::SUPPORTED_VERSIONS, "requested": requested }));

            return Err(error);
        };

        self.state = TransportState::Initializing;

        let backend = match self.acquire_backend().await {
            Ok(backend) => backend,
            Err(error) => {
                self.state = TransportState::Unbound;
                return Err(error);
            }
        };

        if self.kind == TransportKind::StreamableHttp && self.gateway.config().sessions.enabled {
            let session_id =
                self.gateway
                    .sessions()
                    .create_session(&self.tenant, &self.connector, backend.clone(), version);

            self.session_id = Some(session_id);
        }

        self.binding = Some(Binding { backend, version });
        self.state = TransportState::Ready;

        log::debug!(
            "Transport {:?} for {}/{} ready with protocol version {version}",
            self.kind,
            self.tenant,
            self.connector
        );

        let server_name = format!("relay ({}/{})", self.tenant, self.connector);

        Ok(protocol::initialize_result(version, &server_name))
    }

    /// Gets a backend from the pool and checks that its tenant may be served.
    async fn acquire_backend(&self) -> Result<Arc<BackendInstance>, ErrorObject> {
        let key = TenantConnectorKey::new(&self.tenant, &self.connector, self.user_token.as_ref());

        let backend = self.gateway.pool().get_or_create(key).await.map_err(|error| {
            if error.is_unavailable() {
                log::debug!("Refusing {}/{}: {error}", self.tenant, self.connector);
                ErrorObject::tenant_unavailable(TENANT_UNAVAILABLE)
            } else {
                ErrorObject::internal_error(error)
            }
        })?;

        if !backend.initialize().await {
            return Err(ErrorObject::tenant_unavailable(TENANT_UNAVAILABLE));
        }

        if self.user_token.is_some() {
            backend.set_user_token(self.user_token.clone());
        }

        Ok(backend)
    }

    async fn resolve_backend(&mut self) -> Result<Arc<BackendInstance>, ErrorObject> {
        if self.state == TransportState::Closed {
            return Err(ErrorObject::tenant_unavailable("Transport is closed"));
        }

        if let Some(binding) = &self.binding {
            return Ok(binding.backend.clone());
        }

        if !self.stateless {
            return Err(ErrorObject::tenant_unavailable("Session not initialized"));
        }

        let backend = self.acquire_backend().await?;

        self.binding = Some(Binding {
            backend: backend.clone(),
            version: protocol::LATEST_VERSION,
        });

        self.state = TransportState::Ready;

        Ok(backend)
    }

    fn set_user_token(&mut self, params: Option<&Value>) -> Result<(), ErrorObject> {
        let Some(token) = params.and_then(|params| params.get("token")).and_then(Value::as_str) else {
            return Err(ErrorObject::invalid_params("auth/setUserToken requires a string 'token'"));
        };

        let token = SecretString::from(token);

        if let Some(binding) = &self.binding {
            binding.backend.set_user_token(Some(token.clone()));
        }

        self.user_token = Some(token);

        log::debug!("Updated user token for {}/{}", self.tenant, self.connector);

        Ok(())
    }

    fn dispatch(
        &self,
        id: Value,
        method: Method,
        params: Option<Value>,
        backend: Arc<BackendInstance>,
    ) -> BoxFuture<'static, Value> {
        let gateway = self.gateway.clone();
        let scope = self.push_scope().map(str::to_string);

        let push = ServerPush::new(
            gateway.outbound().clone(),
            self.tenant.clone(),
            self.connector.clone(),
            scope.clone(),
        );

        let context = ToolContext {
            tenant: self.tenant.clone(),
            connector: self.connector.clone(),
            session_id: scope,
            user_token: None,
            push,
        };

        async move {
            let result = match method {
                Method::ToolsList => list_tools(&backend).await,
                Method::ToolsCall => call_tool(&gateway, &backend, params, context).await,
                Method::ResourcesList => list_resources(&backend).await,
                Method::ResourcesRead => read_resource(&backend, params, context).await,
                Method::Initialize | Method::Ping | Method::SetUserToken => {
                    Err(ErrorObject::internal_error("method is handled by the transport"))
                }
            };

            match result {
                Ok(result) => protocol::success_envelope(id, result),
                Err(error) => protocol::error_envelope(Some(id), error),
            }
        }
        .boxed()
    }
}

/// Runs a deferred request on its own task, so it completes even if the connection
/// that sent it goes away.
pub fn detach(response: BoxFuture<'static, Value>) -> BoxFuture<'static, Value> {
    let task = tokio::spawn(response);

    async move {
        task.await.unwrap_or_else(|error| {
            log::error!("Request task failed: {error}");
            protocol::error_envelope(None, ErrorObject::internal_error(error))
        })
    }
    .boxed()
}

fn reply_error(id: Value, error: ErrorObject) -> Routed {
    Routed::Reply(Some(protocol::error_envelope(Some(id), error)))
}

fn to_value(value: impl Serialize) -> Result<Value, ErrorObject> {
    serde_json::to_value(value).map_err(ErrorObject::internal_error)
}

async fn list_tools(backend: &BackendInstance) -> Result<Value, ErrorObject> {
    let tools = backend.list_tools().await.map_err(|error| {
        log::error!("Listing tools of {} failed: {error}", backend.key());
        ErrorObject::internal_error(error)
    })?;

    Ok(json!({ "tools": tools }))
}

async fn list_resources(backend: &BackendInstance) -> Result<Value, ErrorObject> {
    let resources = backend.list_resources().await.map_err(|error| {
        log::error!("Listing resources of {} failed: {error}", backend.key());
        ErrorObject::internal_error(error)
    })?;

    Ok(json!({ "resources": resources }))
}

async fn call_tool(
    gateway: &Gateway,
    backend: &BackendInstance,
    params: Option<Value>,
    mut context: ToolContext,
) -> Result<Value, ErrorObject> {
    let Some(Value::Object(mut params)) = params else {
        return Err(ErrorObject::invalid_params("tools/call requires params"));
    };

    let name = match params.remove("name") {
        Some(Value::String(name)) => name,
        _ => return Err(ErrorObject::invalid_params("tools/call requires a string 'name'")),
    };

    let arguments: Option<JsonObject> = match params.remove("arguments") {
        None | Some(Value::Null) => None,
        Some(Value::Object(arguments)) => Some(arguments),
        Some(_) => return Err(ErrorObject::invalid_params("tools/call 'arguments' must be an object")),
    };

    let policy = gateway.policy().check_tool_policy(&name, backend.connector_type());

    if !policy.allowed {
        let reason = policy
            .reason
            .unwrap_or_else(|| format!("Tool '{name}' is not allowed"));

        log::info!("Policy denied tool '{name}' for {}: {reason}", backend.key());

        return to_value(CallToolResult::error(vec![Content::text(reason)]));
    }

    // Read at call time, so a token set after binding applies to this call.
    context.user_token = backend.user_token();

    log::debug!("Calling tool '{name}' on {}", backend.key());

    match backend.call_tool(&name, arguments, context).await {
        Ok(result) => to_value(result),
        Err(error) => {
            log::error!("Tool '{name}' on {} failed: {error}", backend.key());
            Err(ErrorObject::internal_error(error))
        }
    }
}

async fn read_resource(
    backend: &BackendInstance,
    params: Option<Value>,
    mut context: ToolContext,
) -> Result<Value, ErrorObject> {
    let Some(uri) = params
        .as_ref()
        .and_then(|params| params.get("uri"))
        .and_then(Value::as_str)
    else {
        return Err(ErrorObject::invalid_params("resources/read requires a string 'uri'"));
    };

    context.user_token = backend.user_token();

    match backend.read_resource(uri, context).await {
        Ok(result) => to_value(result),
        Err(error) => {
            log::error!("Reading resource '{uri}' of {} failed: {error}", backend.key());
            Err(ErrorObject::internal_error(error))
        }
    }
}
