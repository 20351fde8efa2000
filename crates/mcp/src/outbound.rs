//! Per tenant and connector queues of server-initiated messages.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use dashmap::{DashMap, mapref::one::RefMut};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{events::EventBufferManager, protocol};

/// A server-initiated message on its way to the clients of a tenant and connector.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    /// The session the message belongs to. Session-less messages go to every subscriber.
    pub session_id: Option<String>,
    /// Id assigned by the session's event buffer, if the message was buffered.
    pub event_id: Option<u64>,
    /// The JSON-RPC message.
    pub message: Value,
}

impl OutboundEvent {
    /// True if a subscriber bound to `session_id` should receive this event.
    pub fn is_visible_to(&self, session_id: Option<&str>) -> bool {
        match (&self.session_id, session_id) {
            (None, _) => true,
            (Some(target), Some(session_id)) => target == session_id,
            (Some(_), None) => false,
        }
    }
}

struct Queue {
    sender: broadcast::Sender<OutboundEvent>,
    // Buffer append and broadcast happen under this lock, so subscribers see events in
    // event id order.
    ordering: Mutex<()>,
}

/// Broadcast queues keyed by tenant and connector.
pub struct OutboundQueues {
    capacity: usize,
    queues: DashMap<(String, String), Arc<Queue>>,
    events: Arc<EventBufferManager>,
}

impl OutboundQueues {
    /// Creates queues holding at most `capacity` undelivered messages per subscriber.
    pub fn new(capacity: usize, events: Arc<EventBufferManager>) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: DashMap::new(),
            events,
        }
    }

    fn entry(&self, tenant: &str, connector: &str) -> RefMut<'_, (String, String), Arc<Queue>> {
        let key = (tenant.to_string(), connector.to_string());

        self.queues.entry(key).or_insert_with(|| {
            let (sender, _) = broadcast::channel(self.capacity);

            Arc::new(Queue {
                sender,
                ordering: Mutex::new(()),
            })
        })
    }

    fn queue(&self, tenant: &str, connector: &str) -> Arc<Queue> {
        self.entry(tenant, connector).clone()
    }

    /// Subscribes to the messages of a tenant and connector.
    pub fn subscribe(&self, tenant: &str, connector: &str) -> broadcast::Receiver<OutboundEvent> {
        // The receiver is registered while the entry is held, so pruning cannot drop the
        // queue between creation and subscription.
        self.entry(tenant, connector).sender.subscribe()
    }

    /// Drops the queues nobody listens to. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.queues.len();
        self.queues.retain(|_, queue| queue.sender.receiver_count() > 0);

        before - self.queues.len()
    }

    /// Number of tenant and connector queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// True when no queue exists.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Publishes a message, recording it in the session's event buffer first.
    ///
    /// Returns the event id when the message was buffered. Without subscribers the
    /// message only lives in the buffer.
    pub fn publish(&self, tenant: &str, connector: &str, session_id: Option<&str>, message: Value) -> Option<u64> {
        let queue = self.queue(tenant, connector);
        let _ordering = queue.ordering.lock().unwrap_or_else(PoisonError::into_inner);

        let event_id = session_id
            .and_then(|session_id| self.events.get(session_id))
            .map(|buffer| buffer.append("message", message.clone()));

        let event = OutboundEvent {
            session_id: session_id.map(str::to_string),
            event_id,
            message,
        };

        if queue.sender.send(event).is_err() {
            log::debug!("No live subscribers for {tenant}/{connector}, message kept for replay only");
        }

        event_id
    }

    /// Number of subscribers of a tenant and connector.
    pub fn subscriber_count(&self, tenant: &str, connector: &str) -> usize {
        self.queues
            .get(&(tenant.to_string(), connector.to_string()))
            .map(|queue| queue.sender.receiver_count())
            .unwrap_or_default()
    }
}

/// Handle connectors use to emit notifications to their clients.
#[derive(Clone)]
pub struct ServerPush {
    queues: Arc<OutboundQueues>,
    tenant: String,
    connector: String,
    session_id: Option<String>,
}

impl ServerPush {
    pub(crate) fn new(
        queues: Arc<OutboundQueues>,
        tenant: String,
        connector: String,
        session_id: Option<String>,
    ) -> Self {
        Self {
            queues,
            tenant,
            connector,
            session_id,
        }
    }

    /// Sends a notification to the session of the current call, or to every client of
    /// the tenant and connector when the call has no session.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Option<u64> {
        self.queues.publish(
            &self.tenant,
            &self.connector,
            self.session_id.as_deref(),
            protocol::notification(method, params),
        )
    }

    /// Sends a notification to every client of the tenant and connector.
    pub fn broadcast(&self, method: &str, params: Option<Value>) {
        self.queues
            .publish(&self.tenant, &self.connector, None, protocol::notification(method, params));
    }
}

impl fmt::Debug for ServerPush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPush")
            .field("tenant", &self.tenant)
            .field("connector", &self.connector)
            .field("session_id", &self.session_id)
            .finish()
    }
}
