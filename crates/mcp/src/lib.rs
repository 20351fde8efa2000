//! Multi-tenant MCP gateway: routes WebSocket, streamable HTTP and SSE clients of a
//! tenant and connector to a pooled backend.

#![deny(missing_docs)]

mod backend;
mod connector;
mod downstream;
mod error;
mod events;
mod gateway;
mod http;
mod outbound;
mod policy;
mod pool;
pub mod protocol;
mod session;
mod tenant;
mod transport;

#[cfg(test)]
mod test_support;

pub use backend::{BackendInstance, TenantConnectorKey};
pub use connector::{Connector, ConnectorFactory, ConnectorRegistry, ConnectorSpec, ToolContext};
pub use downstream::DownstreamConnector;
pub use error::GatewayError;
pub use events::{BufferedEvent, EventBuffer, EventBufferManager};
pub use gateway::{Gateway, GatewayBuilder, GatewayStats};
pub use http::{LAST_EVENT_ID, MCP_SESSION_ID, router};
pub use outbound::{OutboundEvent, OutboundQueues, ServerPush};
pub use policy::{AllowAll, ConfigToolPolicy, PolicyResult, ToolPolicy};
pub use pool::{BackendFactory, ConnectorBackendFactory, PoolEntryInfo, PoolError, PoolStats, ServerPool};
pub use session::{Session, SessionRegistry};
pub use tenant::{ConfigTenantDirectory, TenantDirectory, TenantLookup};
pub use transport::{Routed, Transport, TransportKind, TransportState, detach};
