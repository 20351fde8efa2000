//! The pool of backend instances, keyed by tenant, connector and end-user token scope.
//!
//! Construction is single-flight: while a backend is being built its slot holds a
//! shared future, and every lookup of the same key attaches to it. Construction runs
//! on its own task, so it completes and is cached even when every caller went away.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use serde::Serialize;
use tokio::time::Instant;

use crate::{
    backend::{BackendInstance, TenantConnectorKey},
    connector::ConnectorRegistry,
    tenant::{TenantDirectory, TenantLookup},
};

/// Why the pool could not hand out a backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    /// No such tenant.
    #[error("Unknown tenant '{0}'")]
    UnknownTenant(String),
    /// The tenant has no such connector.
    #[error("Unknown connector '{connector}' for tenant '{tenant}'")]
    UnknownConnector {
        /// Tenant id.
        tenant: String,
        /// Connector id.
        connector: String,
    },
    /// The tenant or the connector is inactive.
    #[error("Connector '{connector}' of tenant '{tenant}' is inactive")]
    Disabled {
        /// Tenant id.
        tenant: String,
        /// Connector id.
        connector: String,
    },
    /// Building the connector failed.
    #[error("Failed to construct backend: {0}")]
    Construction(Arc<anyhow::Error>),
}

impl PoolError {
    /// True for the errors that mean the tenant or connector cannot be served at all.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, Self::Construction(_))
    }
}

impl From<anyhow::Error> for PoolError {
    fn from(error: anyhow::Error) -> Self {
        Self::Construction(Arc::new(error))
    }
}

/// Builds backend instances on pool misses.
#[async_trait]
pub trait BackendFactory: Send + Sync + 'static {
    /// Builds the backend for `key`.
    async fn create(&self, key: &TenantConnectorKey) -> Result<Arc<BackendInstance>, PoolError>;
}

/// Builds backends from the tenant directory and the connector registry.
pub struct ConnectorBackendFactory {
    directory: Arc<dyn TenantDirectory>,
    registry: ConnectorRegistry,
}

impl ConnectorBackendFactory {
    /// Creates a factory.
    pub fn new(directory: Arc<dyn TenantDirectory>, registry: ConnectorRegistry) -> Self {
        Self { directory, registry }
    }
}

#[async_trait]
impl BackendFactory for ConnectorBackendFactory {
    async fn create(&self, key: &TenantConnectorKey) -> Result<Arc<BackendInstance>, PoolError> {
        let spec = match self.directory.lookup(&key.tenant, &key.connector).await? {
            TenantLookup::Found(spec) => spec,
            TenantLookup::UnknownTenant => return Err(PoolError::UnknownTenant(key.tenant.clone())),
            TenantLookup::UnknownConnector => {
                return Err(PoolError::UnknownConnector {
                    tenant: key.tenant.clone(),
                    connector: key.connector.clone(),
                });
            }
        };

        if !self.directory.is_active(&key.tenant, &key.connector).await {
            return Err(PoolError::Disabled {
                tenant: key.tenant.clone(),
                connector: key.connector.clone(),
            });
        }

        let connector = self.registry.create(&spec).await?;

        Ok(Arc::new(BackendInstance::new(
            key.clone(),
            spec.connector_type,
            connector,
            self.directory.clone(),
        )))
    }
}

type Construction = Shared<BoxFuture<'static, Result<Arc<BackendInstance>, PoolError>>>;

struct PoolEntry {
    instance: Arc<BackendInstance>,
    created_at: Instant,
    last_access: Instant,
    hit_count: u64,
}

enum Slot {
    Ready(PoolEntry),
    Pending { generation: u64, construction: Construction },
}

#[derive(Default)]
struct PoolState {
    slots: HashMap<TenantConnectorKey, Slot>,
    next_generation: u64,
}

struct PoolInner {
    factory: Arc<dyn BackendFactory>,
    ttl: Duration,
    max_size: usize,
    state: Mutex<PoolState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    size: AtomicUsize,
}

impl PoolInner {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &PoolEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.created_at) >= self.ttl
    }

    /// Stores a finished construction, unless the slot was invalidated meanwhile.
    fn complete(&self, key: &TenantConnectorKey, generation: u64, result: &Result<Arc<BackendInstance>, PoolError>) {
        let mut state = self.state();

        let own_slot = matches!(
            state.slots.get(key),
            Some(Slot::Pending { generation: pending, .. }) if *pending == generation
        );

        if !own_slot {
            log::debug!("Backend {key} finished construction after invalidation, not caching it");
            return;
        }

        match result {
            Ok(instance) => {
                self.make_room(&mut state);

                let now = Instant::now();

                state.slots.insert(
                    key.clone(),
                    Slot::Ready(PoolEntry {
                        instance: instance.clone(),
                        created_at: now,
                        last_access: now,
                        hit_count: 0,
                    }),
                );

                self.size.fetch_add(1, Ordering::Relaxed);
                log::debug!("Cached backend {key}");
            }
            Err(error) => {
                state.slots.remove(key);
                log::error!("Failed to construct backend {key}: {error}");
            }
        }
    }

    /// Evicts least recently used entries until one more fits.
    fn make_room(&self, state: &mut PoolState) {
        loop {
            let ready = state
                .slots
                .values()
                .filter(|slot| matches!(slot, Slot::Ready(_)))
                .count();

            if ready < self.max_size {
                return;
            }

            let oldest = state
                .slots
                .iter()
                .filter_map(|(key, slot)| match slot {
                    Slot::Ready(entry) => Some((key, entry.last_access)),
                    Slot::Pending { .. } => None,
                })
                .min_by_key(|(_, last_access)| *last_access)
                .map(|(key, _)| key.clone());

            let Some(oldest) = oldest else {
                return;
            };

            state.slots.remove(&oldest);

            self.size.fetch_sub(1, Ordering::Relaxed);
            self.evictions.fetch_add(1, Ordering::Relaxed);

            log::debug!("Evicted least recently used backend {oldest}");
        }
    }
}

/// Pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Lookups served by a cached or in-flight backend.
    pub hits: u64,
    /// Lookups that started a construction.
    pub misses: u64,
    /// Entries removed to stay within the capacity.
    pub evictions: u64,
    /// Cached backends.
    pub size: usize,
}

/// A cached backend as seen by the statistics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PoolEntryInfo {
    /// Tenant id.
    pub tenant: String,
    /// Connector id.
    pub connector: String,
    /// Whether the entry is scoped to an end-user token.
    pub user_scoped: bool,
    /// Time since construction.
    #[serde(serialize_with = "serialize_secs")]
    pub age: Duration,
    /// Time since the last lookup.
    #[serde(serialize_with = "serialize_secs")]
    pub idle: Duration,
    /// Lookups served by this entry.
    pub hit_count: u64,
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Cache of backend instances.
#[derive(Clone)]
pub struct ServerPool {
    inner: Arc<PoolInner>,
}

impl ServerPool {
    /// Creates an empty pool.
    ///
    /// Entries live for `ttl` from their construction, lookups do not extend it.
    pub fn new(factory: Arc<dyn BackendFactory>, ttl: Duration, max_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                factory,
                ttl,
                max_size: max_size.max(1),
                state: Mutex::new(PoolState::default()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                size: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns the cached backend for `key`, constructing it on a miss.
    pub async fn get_or_create(&self, key: TenantConnectorKey) -> Result<Arc<BackendInstance>, PoolError> {
        let construction = {
            let mut state = self.inner.state();
            let now = Instant::now();

            let pending = match state.slots.get_mut(&key) {
                Some(Slot::Ready(entry)) if !self.inner.is_expired(entry, now) => {
                    entry.last_access = now;
                    entry.hit_count += 1;

                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Pool hit for backend {key}");

                    return Ok(entry.instance.clone());
                }
                Some(Slot::Pending { construction, .. }) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Waiting for in-flight construction of backend {key}");

                    Some(construction.clone())
                }
                _ => None,
            };

            if pending.is_none() && state.slots.remove(&key).is_some() {
                self.inner.size.fetch_sub(1, Ordering::Relaxed);
                log::debug!("Backend {key} expired, rebuilding");
            }

            match pending {
                Some(construction) => construction,
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Pool miss for backend {key}");

                    let generation = state.next_generation;
                    state.next_generation += 1;

                    let construction = self.spawn_construction(key.clone(), generation);

                    state.slots.insert(
                        key,
                        Slot::Pending {
                            generation,
                            construction: construction.clone(),
                        },
                    );

                    construction
                }
            }
        };

        construction.await
    }

    fn spawn_construction(&self, key: TenantConnectorKey, generation: u64) -> Construction {
        let inner = self.inner.clone();

        let task = tokio::spawn(async move {
            let result = inner.factory.create(&key).await;
            inner.complete(&key, generation, &result);

            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(error) => Err(PoolError::Construction(Arc::new(anyhow::anyhow!(
                    "Backend construction task failed: {error}"
                )))),
            }
        }
        .boxed()
        .shared()
    }

    /// Removes every backend of a tenant and connector, whatever the token scope.
    ///
    /// A construction in flight still completes for its waiters but is not cached.
    /// Returns the number of removed slots.
    pub fn invalidate(&self, tenant: &str, connector: &str) -> usize {
        let mut state = self.inner.state();
        let before = state.slots.len();
        let mut ready_removed = 0;

        state.slots.retain(|key, slot| {
            let keep = !key.matches(tenant, connector);

            if !keep && matches!(slot, Slot::Ready(_)) {
                ready_removed += 1;
            }

            keep
        });

        self.inner.size.fetch_sub(ready_removed, Ordering::Relaxed);

        let removed = before - state.slots.len();

        if removed > 0 {
            log::debug!("Invalidated {removed} backend(s) of {tenant}/{connector}");
        }

        removed
    }

    /// Drops every expired entry. Returns the number of dropped entries.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.inner.state();
        let now = Instant::now();
        let before = state.slots.len();

        state.slots.retain(|_, slot| match slot {
            Slot::Ready(entry) => !self.inner.is_expired(entry, now),
            Slot::Pending { .. } => true,
        });

        let purged = before - state.slots.len();
        self.inner.size.fetch_sub(purged, Ordering::Relaxed);

        if purged > 0 {
            log::debug!("Purged {purged} expired backend(s)");
        }

        purged
    }

    /// Drops every cached backend.
    pub fn clear(&self) {
        let mut state = self.inner.state();

        state.slots.retain(|_, slot| matches!(slot, Slot::Pending { .. }));
        self.inner.size.store(0, Ordering::Relaxed);
    }

    /// Pool counters, read without locking the pool.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            size: self.inner.size.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of the live cached entries.
    pub fn entries(&self) -> Vec<PoolEntryInfo> {
        let state = self.inner.state();
        let now = Instant::now();

        let mut entries: Vec<_> = state
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready(entry) if !self.inner.is_expired(entry, now) => Some(PoolEntryInfo {
                    tenant: key.tenant.clone(),
                    connector: key.connector.clone(),
                    user_scoped: key.token_fingerprint.is_some(),
                    age: now.saturating_duration_since(entry.created_at),
                    idle: now.saturating_duration_since(entry.last_access),
                    hit_count: entry.hit_count,
                }),
                _ => None,
            })
            .collect();

        entries.sort_by(|a, b| (&a.tenant, &a.connector).cmp(&(&b.tenant, &b.connector)));
        entries
    }
}
