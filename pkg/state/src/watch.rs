use pkg_types::Resource;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast;

use crate::error::StoreError;

/// Type of a change in the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// A typed watch event, serialized as `{"type": "ADDED", "object": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent<K> {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub object: K,
}

impl<K: Resource> WatchEvent<K> {
    pub fn new(event_type: EventType, object: K) -> Self {
        Self { event_type, object }
    }

    pub fn resource_version(&self) -> u64 {
        self.object.meta().resource_version_u64()
    }
}

/// A single state mutation as recorded by the event log.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    /// Object bytes after the change; for deletions, the last state.
    pub value: Arc<Vec<u8>>,
    /// Object bytes before a modification, used to evaluate selector transitions.
    pub prev: Option<Arc<Vec<u8>>>,
}

/// In-memory event log that tracks all state mutations with monotonic sequence numbers.
/// The sequence number doubles as the store's resourceVersion.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<EventLogInner>>,
    sender: broadcast::Sender<RawEvent>,
}

struct EventLogInner {
    seq: u64,
    /// Highest sequence number no longer retained; resuming at or below it is too old.
    compacted: u64,
    events: VecDeque<RawEvent>,
    max_events: usize,
}

impl EventLog {
    /// Create a log whose next event gets `start_seq + 1`. History before
    /// `start_seq` is unknown, so resuming from it is reported as too old.
    pub fn new(max_events: usize, broadcast_capacity: usize, start_seq: u64) -> Self {
        let (sender, _) = broadcast::channel(broadcast_capacity);
        Self {
            inner: Arc::new(RwLock::new(EventLogInner {
                seq: start_seq,
                compacted: start_seq,
                events: VecDeque::with_capacity(max_events),
                max_events,
            })),
            sender,
        }
    }

    /// Sequence number the next `emit` will assign.
    pub async fn next_seq(&self) -> u64 {
        self.inner.read().await.seq + 1
    }

    /// Record a new event and broadcast it. Callers serialize writers, so the
    /// returned number always equals the preceding `next_seq`.
    pub async fn emit(
        &self,
        event_type: EventType,
        key: String,
        value: Arc<Vec<u8>>,
        prev: Option<Arc<Vec<u8>>>,
    ) -> u64 {
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let event = RawEvent {
            seq: inner.seq,
            event_type,
            key,
            value,
            prev,
        };
        if inner.events.len() >= inner.max_events {
            if let Some(old) = inner.events.pop_front() {
                inner.compacted = old.seq;
            }
        }
        inner.events.push_back(event.clone());
        // No subscribers is fine.
        let _ = self.sender.send(event);
        inner.seq
    }

    pub async fn current_seq(&self) -> u64 {
        self.inner.read().await.seq
    }

    /// All retained events after `from_seq`, or `Expired` if some were dropped.
    pub async fn events_since(&self, from_seq: u64) -> Result<Vec<RawEvent>, StoreError> {
        let inner = self.inner.read().await;
        if from_seq < inner.compacted {
            return Err(StoreError::Expired(format!(
                "requested {} but history starts after {}",
                from_seq, inner.compacted
            )));
        }
        Ok(inner
            .events
            .iter()
            .filter(|e| e.seq > from_seq)
            .cloned()
            .collect())
    }

    /// Subscribe to receive new events as they are emitted.
    pub fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.sender.subscribe()
    }
}
