//! HTTP sessions: opaque ids that reattach requests to a negotiated backend.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::time::Instant;

use crate::{backend::BackendInstance, events::EventBufferManager};

/// A session created by a successful `initialize`.
///
/// The backend is shared: the pool owns its lifetime and other sessions may use the
/// same instance concurrently.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque session id.
    pub id: String,
    /// Tenant id.
    pub tenant: String,
    /// Connector id.
    pub connector: String,
    /// The backend bound at `initialize`.
    pub backend: Arc<BackendInstance>,
    /// Protocol version negotiated at `initialize`. Never changes.
    pub negotiated_version: &'static str,
    /// When the session was created.
    pub created_at: Instant,
    /// When the session was last looked up.
    pub last_access: Instant,
}

impl Session {
    /// True if the session belongs to the given tenant and connector.
    pub fn matches(&self, tenant: &str, connector: &str) -> bool {
        self.tenant == tenant && self.connector == connector
    }
}

/// Live sessions with an idle timeout.
pub struct SessionRegistry {
    ttl: Duration,
    sessions: DashMap<String, Session>,
    events: Arc<EventBufferManager>,
}

impl SessionRegistry {
    /// Creates an empty registry. Sessions expire after `ttl` without lookups.
    pub fn new(ttl: Duration, events: Arc<EventBufferManager>) -> Self {
        Self {
            ttl,
            sessions: DashMap::new(),
            events,
        }
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        now.saturating_duration_since(session.last_access) >= self.ttl
    }

    /// Registers a session and its event buffer, returning the new session id.
    pub fn create_session(
        &self,
        tenant: &str,
        connector: &str,
        backend: Arc<BackendInstance>,
        negotiated_version: &'static str,
    ) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();

        self.events.get_or_create(&id);

        self.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                tenant: tenant.to_string(),
                connector: connector.to_string(),
                backend,
                negotiated_version,
                created_at: now,
                last_access: now,
            },
        );

        log::debug!("Created session {id} for {tenant}/{connector} with protocol version {negotiated_version}");

        id
    }

    /// Looks up a live session and refreshes its idle timeout. Expired sessions read as absent.
    pub fn get_session(&self, id: &str) -> Option<Session> {
        let now = Instant::now();

        let expired = match self.sessions.get_mut(id) {
            None => return None,
            Some(mut session) if !self.is_expired(&session, now) => {
                session.last_access = now;
                return Some(session.clone());
            }
            Some(_) => true,
        };

        if expired && self.sessions.remove_if(id, |_, session| self.is_expired(session, now)).is_some() {
            self.events.remove(id);
            log::debug!("Session {id} expired");
        }

        None
    }

    /// Terminates a session. Returns false if it did not exist.
    pub fn close_session(&self, id: &str) -> bool {
        let closed = self.sessions.remove(id).is_some();
        self.events.remove(id);

        if closed {
            log::debug!("Closed session {id}");
        }

        closed
    }

    /// Drops every expired session. Returns the number of dropped sessions.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();

        self.sessions.retain(|id, session| {
            let keep = !self.is_expired(session, now);

            if !keep {
                expired.push(id.clone());
            }

            keep
        });

        for id in &expired {
            self.events.remove(id);
        }

        if !expired.is_empty() {
            log::debug!("Purged {} expired session(s)", expired.len());
        }

        expired.len()
    }

    /// Drops every session.
    pub fn clear(&self) {
        self.sessions.clear();
        self.events.clear();
    }

    /// Number of sessions, including expired ones not purged yet.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use crate::{
        backend::{BackendInstance, TenantConnectorKey},
        events::EventBufferManager,
        test_support::{EchoConnector, StaticDirectory},
    };

    use super::SessionRegistry;

    fn backend() -> Arc<BackendInstance> {
        Arc::new(BackendInstance::new(
            TenantConnectorKey::new("acme", "github", None),
            "github",
            Arc::new(EchoConnector::default()),
            Arc::new(StaticDirectory::default()),
        ))
    }

    fn registry(ttl: Duration) -> (SessionRegistry, Arc<EventBufferManager>) {
        let events = Arc::new(EventBufferManager::new(10));
        (SessionRegistry::new(ttl, events.clone()), events)
    }

    #[tokio::test]
    async fn create_and_get() {
        let (registry, events) = registry(Duration::from_secs(60));
        let backend = backend();

        let id = registry.create_session("acme", "github", backend.clone(), "2025-06-18");

        let session = registry.get_session(&id).unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.negotiated_version, "2025-06-18");
        assert!(session.matches("acme", "github"));
        assert!(!session.matches("acme", "jira"));
        assert!(Arc::ptr_eq(&session.backend, &backend));
        assert!(events.get(&id).is_some());
    }

    #[tokio::test]
    async fn ids_are_unique_and_opaque() {
        let (registry, _) = registry(Duration::from_secs(60));
        let backend = backend();

        let first = registry.create_session("acme", "github", backend.clone(), "2025-06-18");
        let second = registry.create_session("acme", "github", backend, "2025-06-18");

        assert_ne!(first, second);
        assert_eq!(first.len(), 32);
        assert!(!first.contains("acme"));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (registry, events) = registry(Duration::from_secs(60));
        let id = registry.create_session("acme", "github", backend(), "2025-06-18");

        assert!(registry.close_session(&id));
        assert!(!registry.close_session(&id));
        assert!(registry.get_session(&id).is_none());
        assert!(events.get(&id).is_none());
    }

    #[tokio::test]
    async fn idle_sessions_expire_and_lookups_refresh_them() {
        tokio::time::pause();

        let (registry, events) = registry(Duration::from_secs(60));
        let id = registry.create_session("acme", "github", backend(), "2025-06-18");

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(registry.get_session(&id).is_some());

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(registry.get_session(&id).is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(registry.get_session(&id).is_none());
        assert!(registry.is_empty());
        assert!(events.get(&id).is_none());
    }

    #[tokio::test]
    async fn purge_drops_expired_sessions() {
        tokio::time::pause();

        let (registry, _) = registry(Duration::from_secs(60));
        let old = registry.create_session("acme", "github", backend(), "2025-06-18");

        tokio::time::advance(Duration::from_secs(30)).await;
        let fresh = registry.create_session("acme", "github", backend(), "2024-11-05");

        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.get_session(&old).is_none());
        assert!(registry.get_session(&fresh).is_some());
    }
}
