//! Gateway configuration: transport mount point, pool, sessions and streaming.

use std::{collections::BTreeMap, time::Duration};

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Settings of the MCP gateway core.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Path prefix for the transports, mounted as `{path}/{tenant}/{connector}`.
    pub path: String,
    /// Origins allowed to reach the transports. Empty allows every origin.
    pub allowed_origins: Vec<String>,
    /// HTTP header carrying an end-user token that scopes the pooled backend.
    pub user_token_header: String,
    /// Path of the read-only statistics endpoint. Disabled when not set.
    pub stats_path: Option<String>,
    /// Backend instance pool settings.
    pub pool: PoolConfig,
    /// HTTP session settings.
    pub sessions: SessionConfig,
    /// Per-session event buffer settings.
    pub events: EventBufferConfig,
    /// Server-sent events settings.
    pub sse: SseConfig,
    /// Tool policies keyed by connector type.
    pub policies: BTreeMap<String, ToolPolicyConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            path: "/mcp".to_string(),
            allowed_origins: Vec::new(),
            user_token_header: "X-User-Token".to_string(),
            stats_path: None,
            pool: PoolConfig::default(),
            sessions: SessionConfig::default(),
            events: EventBufferConfig::default(),
            sse: SseConfig::default(),
            policies: BTreeMap::new(),
        }
    }
}

impl GatewayConfig {
    /// Returns true if the given origin may reach the transports.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

/// Backend instance pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Lifetime of a pooled backend, counted from its creation.
    #[serde(deserialize_with = "deserialize_duration")]
    pub ttl: Duration,
    /// Maximum number of pooled backends.
    pub max_size: usize,
    /// How often expired pool entries and sessions are purged.
    #[serde(deserialize_with = "deserialize_duration")]
    pub maintenance_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            max_size: 100,
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

/// HTTP session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Whether `initialize` over HTTP registers a session and returns `Mcp-Session-Id`.
    pub enabled: bool,
    /// Idle time after which a session expires.
    #[serde(deserialize_with = "deserialize_duration")]
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Per-session event buffer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventBufferConfig {
    /// Number of events retained per session for `Last-Event-ID` replay.
    pub capacity: usize,
}

impl Default for EventBufferConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

/// Server-sent events settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SseConfig {
    /// Idle time after which a streamable SSE connection receives a keepalive comment.
    #[serde(deserialize_with = "deserialize_duration")]
    pub keepalive: Duration,
    /// Heartbeat interval of the legacy SSE transport.
    #[serde(deserialize_with = "deserialize_duration")]
    pub legacy_heartbeat: Duration,
    /// Capacity of each per tenant and connector outbound queue.
    pub channel_capacity: usize,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(30),
            legacy_heartbeat: Duration::from_secs(15),
            channel_capacity: 256,
        }
    }
}

/// Tool policy of one connector type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPolicyConfig {
    /// Tools that may never be called through connectors of this type.
    pub deny_tools: Vec<String>,
}
