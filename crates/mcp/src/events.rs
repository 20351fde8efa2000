//! Per-session buffers of server-initiated events, replayed on SSE reconnect.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use dashmap::DashMap;
use serde_json::Value;

/// A server-initiated message recorded for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedEvent {
    /// Monotonic id within the session, starting at 1.
    pub id: u64,
    /// SSE event type, e.g. `message`.
    pub event_type: String,
    /// The JSON-RPC message.
    pub data: Value,
}

struct EventLog {
    events: VecDeque<BufferedEvent>,
    next_id: u64,
}

/// A bounded, ordered log of events for one session.
///
/// Ids strictly increase and are never reused. Once the buffer is full the oldest
/// events are dropped, which shows up to a replaying client as a jump in ids.
pub struct EventBuffer {
    session_id: String,
    capacity: usize,
    log: Mutex<EventLog>,
}

impl EventBuffer {
    fn new(session_id: String, capacity: usize) -> Self {
        Self {
            session_id,
            capacity: capacity.max(1),
            log: Mutex::new(EventLog {
                events: VecDeque::new(),
                next_id: 1,
            }),
        }
    }

    /// Records an event and returns its id.
    pub fn append(&self, event_type: &str, data: Value) -> u64 {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);

        let id = log.next_id;
        log.next_id += 1;

        log.events.push_back(BufferedEvent {
            id,
            event_type: event_type.to_string(),
            data,
        });

        while log.events.len() > self.capacity {
            log.events.pop_front();
        }

        id
    }

    /// Events with an id greater than `last_event_id`, oldest first.
    ///
    /// The result is a snapshot of the buffer at the time of the call.
    pub fn replay_from(&self, last_event_id: u64) -> impl Iterator<Item = BufferedEvent> + use<> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);

        let oldest = log.events.front().map(|event| event.id);

        if let Some(oldest) = oldest.filter(|oldest| *oldest > last_event_id.saturating_add(1)) {
            log::warn!(
                "Replay for session {} starts after a gap: requested events after {last_event_id}, oldest retained is {oldest}",
                self.session_id,
            );
        }

        let events: Vec<_> = log
            .events
            .iter()
            .filter(|event| event.id > last_event_id)
            .cloned()
            .collect();

        events.into_iter()
    }

    /// The id of the most recent event, zero when nothing was appended yet.
    pub fn last_event_id(&self) -> u64 {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).next_id - 1
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).events.len()
    }

    /// True if no events are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns the event buffer of every session.
pub struct EventBufferManager {
    capacity: usize,
    buffers: DashMap<String, Arc<EventBuffer>>,
}

impl EventBufferManager {
    /// Creates a manager whose buffers retain at most `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: DashMap::new(),
        }
    }

    /// Returns the buffer of a session, creating it on first use.
    pub fn get_or_create(&self, session_id: &str) -> Arc<EventBuffer> {
        if let Some(buffer) = self.buffers.get(session_id) {
            return buffer.clone();
        }

        self.buffers
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(EventBuffer::new(session_id.to_string(), self.capacity)))
            .clone()
    }

    /// Returns the buffer of a session if one exists.
    pub fn get(&self, session_id: &str) -> Option<Arc<EventBuffer>> {
        self.buffers.get(session_id).map(|buffer| buffer.clone())
    }

    /// Drops the buffer of a session.
    pub fn remove(&self, session_id: &str) {
        if self.buffers.remove(session_id).is_some() {
            log::debug!("Dropped event buffer of session {session_id}");
        }
    }

    /// Drops every buffer.
    pub fn clear(&self) {
        self.buffers.clear();
    }

    /// Number of live buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// True if there are no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
