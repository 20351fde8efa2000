//! The gateway services, built once at startup and shared by every transport.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use config::{GatewayConfig, TenantConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    connector::ConnectorRegistry,
    events::EventBufferManager,
    outbound::OutboundQueues,
    policy::{ConfigToolPolicy, ToolPolicy},
    pool::{BackendFactory, ConnectorBackendFactory, PoolEntryInfo, PoolStats, ServerPool},
    session::SessionRegistry,
    tenant::{ConfigTenantDirectory, TenantDirectory},
};

struct Inner {
    config: GatewayConfig,
    pool: ServerPool,
    sessions: SessionRegistry,
    events: Arc<EventBufferManager>,
    outbound: Arc<OutboundQueues>,
    directory: Arc<dyn TenantDirectory>,
    policy: Arc<dyn ToolPolicy>,
}

/// Handle to the pool, session registry, event buffers and outbound queues.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

/// Snapshot of the gateway state.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    /// Pool counters.
    pub pool: PoolStats,
    /// Live cached backends.
    pub entries: Vec<PoolEntryInfo>,
    /// Registered sessions.
    pub sessions: usize,
    /// Live event buffers.
    pub event_buffers: usize,
}

impl Gateway {
    /// Starts building a gateway.
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            tenants: BTreeMap::new(),
            directory: None,
            policy: None,
            registry: ConnectorRegistry::new(),
            backend_factory: None,
        }
    }

    /// Gateway settings.
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// The backend pool.
    pub fn pool(&self) -> &ServerPool {
        &self.inner.pool
    }

    /// The session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    /// The per-session event buffers.
    pub fn events(&self) -> &Arc<EventBufferManager> {
        &self.inner.events
    }

    /// The outbound queues.
    pub fn outbound(&self) -> &Arc<OutboundQueues> {
        &self.inner.outbound
    }

    /// The tenant directory.
    pub fn directory(&self) -> &Arc<dyn TenantDirectory> {
        &self.inner.directory
    }

    /// The tool policy.
    pub fn policy(&self) -> &dyn ToolPolicy {
        self.inner.policy.as_ref()
    }

    /// Current counters and cached entries.
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            pool: self.inner.pool.stats(),
            entries: self.inner.pool.entries(),
            sessions: self.inner.sessions.len(),
            event_buffers: self.inner.events.len(),
        }
    }

    /// One maintenance pass: drops expired backends and sessions, and queues without
    /// subscribers.
    pub fn run_maintenance(&self) {
        let backends = self.inner.pool.purge_expired();
        let sessions = self.inner.sessions.purge_expired();
        let queues = self.inner.outbound.prune_idle();

        if backends > 0 || sessions > 0 || queues > 0 {
            log::debug!("Maintenance purged {backends} backend(s), {sessions} session(s) and {queues} idle queue(s)");
        }
    }

    /// Runs [`run_maintenance`](Self::run_maintenance) every `pool.maintenance_interval`
    /// until the token is cancelled.
    pub fn spawn_maintenance(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let gateway = self.clone();
        let period = gateway.config().pool.maintenance_interval.max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => gateway.run_maintenance(),
                }
            }

            log::debug!("Gateway maintenance stopped");
        })
    }

    /// Drops every cached backend, session and event buffer.
    pub fn shutdown(&self) {
        log::info!("Shutting down gateway");

        self.inner.sessions.clear();
        self.inner.pool.clear();
    }
}

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    tenants: BTreeMap<String, TenantConfig>,
    directory: Option<Arc<dyn TenantDirectory>>,
    policy: Option<Arc<dyn ToolPolicy>>,
    registry: ConnectorRegistry,
    backend_factory: Option<Arc<dyn BackendFactory>>,
}

impl GatewayBuilder {
    /// Serves the tenants from the configuration. Ignored when a custom directory is set.
    pub fn tenants(mut self, tenants: BTreeMap<String, TenantConfig>) -> Self {
        self.tenants = tenants;
        self
    }

    /// Uses a custom tenant directory.
    pub fn directory(mut self, directory: Arc<dyn TenantDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Uses a custom tool policy instead of the configured deny lists.
    pub fn policy(mut self, policy: Arc<dyn ToolPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Connector factories by connector type.
    pub fn registry(mut self, registry: ConnectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the way backends are constructed on pool misses.
    pub fn backend_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.backend_factory = Some(factory);
        self
    }

    /// Builds the gateway.
    pub fn build(self) -> Gateway {
        let Self {
            config,
            tenants,
            directory,
            policy,
            registry,
            backend_factory,
        } = self;

        let directory = directory.unwrap_or_else(|| Arc::new(ConfigTenantDirectory::new(tenants)));
        let policy = policy.unwrap_or_else(|| Arc::new(ConfigToolPolicy::new(config.policies.clone())));

        let backend_factory =
            backend_factory.unwrap_or_else(|| Arc::new(ConnectorBackendFactory::new(directory.clone(), registry)));

        let events = Arc::new(EventBufferManager::new(config.events.capacity));
        let outbound = Arc::new(OutboundQueues::new(config.sse.channel_capacity, events.clone()));
        let sessions = SessionRegistry::new(config.sessions.ttl, events.clone());
        let pool = ServerPool::new(backend_factory, config.pool.ttl, config.pool.max_size);

        log::debug!(
            "Gateway ready: pool ttl {:?}, pool size {}, sessions {}",
            config.pool.ttl,
            config.pool.max_size,
            if config.sessions.enabled { "enabled" } else { "disabled" }
        );

        Gateway {
            inner: Arc::new(Inner {
                config,
                pool,
                sessions,
                events,
                outbound,
                directory,
                policy,
            }),
        }
    }
}
