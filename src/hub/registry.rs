//! Notification hub — connection/topic registry with best-effort fan-out.
//!
//! The hub owns two mappings (connection → topics, topic → connections) kept
//! consistent under a single lock. Publishing never blocks on a slow client:
//! each connection gets an unbounded channel, and a send failure only means
//! the receiver is already gone — the entry is pruned on disconnect.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use super::events::{Event, Topic};

/// Opaque connection identifier handed out by `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct ConnectionEntry {
    user_id: String,
    tx: mpsc::UnboundedSender<Event>,
    topics: HashSet<Topic>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    topics: HashMap<Topic, HashSet<ConnectionId>>,
}

/// In-process pub/sub hub with an explicit lifecycle: created at service
/// start, drained at shutdown. Injectable so it can later be swapped for a
/// distributed backend without touching callers.
pub struct NotificationHub {
    state: RwLock<HubState>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(HubState::default()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register an authenticated connection. Auto-subscribes it to its own
    /// `user:<id>` topic and returns the event receiver to drive the socket.
    pub async fn register(
        &self,
        user_id: impl Into<String>,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Event>) {
        let user_id = user_id.into();
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let personal = Topic::User(user_id.clone());

        let mut state = self.state.write().await;
        state.connections.insert(
            id,
            ConnectionEntry {
                user_id: user_id.clone(),
                tx,
                topics: HashSet::from([personal.clone()]),
            },
        );
        state.topics.entry(personal).or_default().insert(id);

        info!(connection = %id, user = %user_id, "Client connected");
        (id, rx)
    }

    /// Subscribe a connection to a topic. No-op for unknown connections.
    pub async fn subscribe(&self, id: ConnectionId, topic: Topic) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.get_mut(&id) else {
            return false;
        };
        entry.topics.insert(topic.clone());
        state.topics.entry(topic.clone()).or_default().insert(id);
        debug!(connection = %id, topic = %topic, "Subscribed");
        true
    }

    /// Unsubscribe a connection from a topic.
    pub async fn unsubscribe(&self, id: ConnectionId, topic: &Topic) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.get_mut(&id) else {
            return false;
        };
        entry.topics.remove(topic);
        if let Some(subscribers) = state.topics.get_mut(topic) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                state.topics.remove(topic);
            }
        }
        debug!(connection = %id, topic = %topic, "Unsubscribed");
        true
    }

    /// Remove a connection from every topic it holds.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.remove(&id) else {
            return;
        };
        for topic in &entry.topics {
            if let Some(subscribers) = state.topics.get_mut(topic) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    state.topics.remove(topic);
                }
            }
        }
        info!(connection = %id, user = %entry.user_id, "Client disconnected");
    }

    /// Deliver an event to every current subscriber of the topic.
    ///
    /// Best-effort: a closed receiver is skipped, and the publish itself
    /// never fails. Returns the number of connections the event was queued
    /// for.
    pub async fn publish(&self, topic: &Topic, event: Event) -> usize {
        let state = self.state.read().await;
        let Some(subscribers) = state.topics.get(topic) else {
            return 0;
        };

        let mut delivered = 0;
        for id in subscribers {
            if let Some(entry) = state.connections.get(id) {
                if entry.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!(topic = %topic, delivered, "Published event");
        delivered
    }

    /// Send an event to every connected client, regardless of topics.
    pub async fn broadcast(&self, event: Event) -> usize {
        let state = self.state.read().await;
        let mut delivered = 0;
        for entry in state.connections.values() {
            if entry.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of currently registered connections.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Whether any connection is registered for the given user.
    pub async fn is_user_connected(&self, user_id: &str) -> bool {
        self.state
            .read()
            .await
            .connections
            .values()
            .any(|entry| entry.user_id == user_id)
    }
}
