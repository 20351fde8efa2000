//! JSON-RPC message classification, protocol version negotiation and response envelopes.
//!
//! Everything in here is pure: no I/O and no shared state. Messages are inspected as
//! [`serde_json::Value`] so that a malformed message can still be answered with the
//! id it carried.

use std::{borrow::Cow, fmt};

use serde::Serialize;
use serde_json::{Value, json};

/// Protocol versions this gateway speaks, newest first.
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-06-18", "2024-11-05"];

/// The newest supported protocol version.
pub const LATEST_VERSION: &str = SUPPORTED_VERSIONS[0];

/// Picks the newest supported version that is not newer than the client's.
///
/// Versions are date stamps, so comparing them as strings orders them correctly.
/// Returns `None` when the client is older than everything we support.
pub fn negotiate(client_version: &str) -> Option<&'static str> {
    SUPPORTED_VERSIONS
        .iter()
        .copied()
        .find(|supported| *supported <= client_version)
}

/// A JSON-RPC error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    /// The payload was not valid JSON.
    pub const PARSE_ERROR: Self = Self(-32700);
    /// The payload was JSON but not a valid JSON-RPC message.
    pub const INVALID_REQUEST: Self = Self(-32600);
    /// The method is not one we serve.
    pub const METHOD_NOT_FOUND: Self = Self(-32601);
    /// The method exists but its parameters are wrong.
    pub const INVALID_PARAMS: Self = Self(-32602);
    /// The connector or the gateway failed while handling the request.
    pub const INTERNAL_ERROR: Self = Self(-32603);
    /// The tenant or connector is unknown, inactive, or not bound yet.
    pub const TENANT_UNAVAILABLE: Self = Self(-32001);
}

/// The `error` member of a JSON-RPC error response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorObject {
    /// Error code.
    pub code: ErrorCode,
    /// Human readable message.
    pub message: Cow<'static, str>,
    /// Additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Creates an error without additional data.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// -32700
    pub fn parse_error(message: impl fmt::Display) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, format!("Parse error: {message}"))
    }

    /// -32600
    pub fn invalid_request(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::INVALID_REQUEST, reason)
    }

    /// -32601
    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// -32602
    pub fn invalid_params(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message)
    }

    /// -32603, with the failure folded into the message.
    pub fn internal_error(error: impl fmt::Display) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, format!("Internal error: {error}"))
    }

    /// -32001
    pub fn tenant_unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::TENANT_UNAVAILABLE, message)
    }
}

/// An inbound JSON-RPC request: it has both a method and an id.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// Request id, echoed back in the response. Either a string or a number.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Parameters, if any.
    pub params: Option<Value>,
}

/// An inbound JSON-RPC notification: a method without an id. Never answered.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Parameters, if any.
    pub params: Option<Value>,
}

/// The shape of an inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    /// Expects exactly one response.
    Request(Request),
    /// Expects no response.
    Notification(Notification),
    /// A response sent by the client, e.g. to a server-initiated request. Acknowledged
    /// and otherwise ignored.
    Response {
        /// The id the client answered.
        id: Value,
    },
    /// Not a JSON-RPC message. The id is kept when one could be recovered.
    Malformed {
        /// Recovered id, if any.
        id: Option<Value>,
        /// What was wrong with the message.
        reason: &'static str,
    },
}

/// Classifies a single JSON-RPC message.
pub fn classify(message: Value) -> Incoming {
    let Value::Object(mut object) = message else {
        return Incoming::Malformed {
            id: None,
            reason: "Invalid Request: expected a JSON object",
        };
    };

    let id = object.remove("id");
    let valid_id = id.as_ref().is_none_or(|id| id.is_string() || id.is_number());

    match object.get("jsonrpc") {
        None => (),
        Some(Value::String(version)) if version == "2.0" => (),
        Some(_) => {
            return Incoming::Malformed {
                id: id.filter(|_| valid_id),
                reason: "Invalid Request: jsonrpc must be \"2.0\"",
            };
        }
    }

    if !valid_id {
        return Incoming::Malformed {
            id: None,
            reason: "Invalid Request: id must be a string or a number",
        };
    }

    match object.remove("method") {
        Some(Value::String(method)) => {
            let params = object.remove("params");

            match id {
                Some(id) => Incoming::Request(Request { id, method, params }),
                None => Incoming::Notification(Notification { method, params }),
            }
        }
        Some(_) => Incoming::Malformed {
            id,
            reason: "Invalid Request: method must be a string",
        },
        None if object.contains_key("result") || object.contains_key("error") => match id {
            Some(id) => Incoming::Response { id },
            None => Incoming::Malformed {
                id: None,
                reason: "Invalid Request: response without an id",
            },
        },
        None => Incoming::Malformed {
            id,
            reason: "Invalid Request: missing method",
        },
    }
}

/// A parsed request body: one message or a batch.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// A single JSON object.
    Single(Value),
    /// A non-empty JSON array.
    Batch(Vec<Value>),
}

/// Parses a transport payload into a single message or a batch.
///
/// Invalid JSON is a parse error and an empty batch is an invalid request; both
/// must be answered with a single error response carrying a null id.
pub fn parse_payload(body: &[u8]) -> Result<Payload, ErrorObject> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(messages)) if messages.is_empty() => Err(ErrorObject::invalid_request(
            "Invalid Request: empty batch",
        )),
        Ok(Value::Array(messages)) => Ok(Payload::Batch(messages)),
        Ok(message) => Ok(Payload::Single(message)),
        Err(error) => Err(ErrorObject::parse_error(error)),
    }
}

/// Builds a success response.
pub fn success_envelope(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Builds an error response. A missing id is sent as `null`.
pub fn error_envelope(id: Option<Value>, error: ErrorObject) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(Value::Null),
        "error": error,
    })
}

/// Builds a server-initiated notification.
pub fn notification(method: &str, params: Option<Value>) -> Value {
    match params {
        Some(params) => json!({ "jsonrpc": "2.0", "method": method, "params": params }),
        None => json!({ "jsonrpc": "2.0", "method": method }),
    }
}

/// The methods the gateway dispatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// `initialize`
    Initialize,
    /// `ping`
    Ping,
    /// `tools/list`
    ToolsList,
    /// `tools/call`
    ToolsCall,
    /// `resources/list`
    ResourcesList,
    /// `resources/read`
    ResourcesRead,
    /// `auth/setUserToken`, only meaningful on WebSocket connections.
    SetUserToken,
}

impl Method {
    /// Maps a method name to a dispatchable method.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "initialize" => Some(Self::Initialize),
            "ping" => Some(Self::Ping),
            "tools/list" => Some(Self::ToolsList),
            "tools/call" => Some(Self::ToolsCall),
            "resources/list" => Some(Self::ResourcesList),
            "resources/read" => Some(Self::ResourcesRead),
            "auth/setUserToken" => Some(Self::SetUserToken),
            _ => None,
        }
    }

    /// Methods that need a bound backend.
    pub fn requires_backend(self) -> bool {
        !matches!(self, Self::Initialize | Self::Ping)
    }
}

/// The `result` of a successful `initialize`.
pub fn initialize_result(protocol_version: &str, server_name: &str) -> Value {
    json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": { "listChanged": true },
            "resources": { "subscribe": true, "listChanged": true },
        },
        "serverInfo": {
            "name": server_name,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}
