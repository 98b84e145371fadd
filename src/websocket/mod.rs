use crate::models::{ChatId, Message};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod message_types;
pub mod pubsub;

use message_types::{ReceiveMessagePayload, WsOutboundEvent};
use pubsub::{ChannelPublisher, ListenerHealth};

/// Unique identifier for a live WebSocket connection
///
/// Handed out by [`ConnectionRegistry::connect`] and used to join groups and
/// to clean up when the connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Inner {
    connections: HashMap<SubscriberId, UnboundedSender<String>>,
    // chat -> subscribed connections
    groups: HashMap<ChatId, HashSet<SubscriberId>>,
}

impl Inner {
    fn drop_connection(&mut self, id: SubscriberId) {
        self.connections.remove(&id);
        self.groups.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
    }
}

/// Live connections and the conversation groups they joined.
///
/// Delivery never blocks: every connection owns an unbounded channel that its
/// session actor drains.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. The receiver yields every payload published to
    /// the groups it later joins.
    pub async fn connect(&self) -> (SubscriberId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let id = SubscriberId::new();

        let mut guard = self.inner.write().await;
        guard.connections.insert(id, tx);
        tracing::debug!(subscriber = ?id, total = guard.connections.len(), "connection registered");

        (id, rx)
    }

    /// Join `chat_id`'s group. Joining twice is a no-op; unknown ids are ignored.
    pub async fn subscribe(&self, id: SubscriberId, chat_id: &ChatId) -> bool {
        let mut guard = self.inner.write().await;
        if !guard.connections.contains_key(&id) {
            return false;
        }
        let joined = guard.groups.entry(chat_id.clone()).or_default().insert(id);
        if joined {
            tracing::debug!(subscriber = ?id, chat_id = %chat_id, "joined chat group");
        }
        true
    }

    /// Deliver `payload` to every connection in the group, pruning closed ones.
    /// Returns the number of connections reached.
    pub async fn publish(&self, chat_id: &ChatId, payload: &str) -> usize {
        let mut guard = self.inner.write().await;
        let Some(members) = guard.groups.get(chat_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for id in members {
            match guard.connections.get(id) {
                Some(tx) if tx.send(payload.to_string()).is_ok() => delivered += 1,
                _ => dead.push(*id),
            }
        }

        if !dead.is_empty() {
            tracing::debug!(
                chat_id = %chat_id,
                pruned = dead.len(),
                active = delivered,
                "pruned dead subscribers"
            );
            for id in dead {
                guard.drop_connection(id);
            }
        }
        delivered
    }

    /// Remove the connection from every group. Must be called when it closes.
    pub async fn disconnect(&self, id: SubscriberId) {
        let mut guard = self.inner.write().await;
        guard.drop_connection(id);
        tracing::debug!(
            subscriber = ?id,
            remaining = guard.connections.len(),
            "connection removed"
        );
    }

    pub async fn subscriber_count(&self, chat_id: &ChatId) -> usize {
        let guard = self.inner.read().await;
        guard.groups.get(chat_id).map(|g| g.len()).unwrap_or(0)
    }
}

/// Publishes persisted messages to a conversation's group.
///
/// With Redis the event goes through `chat:<chatId>` so every instance's
/// listener relays it locally. Local delivery happens instead when there is no
/// remote publisher, when the publish fails or exceeds its deadline, and when
/// this instance's listener is down.
#[derive(Clone)]
pub struct Fanout {
    registry: ConnectionRegistry,
    remote: Option<Arc<dyn ChannelPublisher>>,
    listener: ListenerHealth,
    publish_timeout: Duration,
}

impl Fanout {
    /// Single-instance fan-out over the local registry only.
    pub fn local(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            remote: None,
            listener: ListenerHealth::default(),
            publish_timeout: Duration::ZERO,
        }
    }

    pub fn with_remote(
        registry: ConnectionRegistry,
        remote: Arc<dyn ChannelPublisher>,
        listener: ListenerHealth,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            remote: Some(remote),
            listener,
            publish_timeout,
        }
    }

    /// Fire-and-forget: failures are logged, never returned, and the remote
    /// publish never holds the caller past `publish_timeout`.
    pub async fn publish_message(&self, chat_id: &ChatId, message: &Message) {
        let event = WsOutboundEvent::ReceiveMessage(ReceiveMessagePayload::from(message));
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(
                    chat_id = %chat_id,
                    error = %e,
                    "failed to encode receiveMessage event"
                );
                return;
            }
        };

        if let Some(remote) = &self.remote {
            let published =
                tokio::time::timeout(self.publish_timeout, remote.publish(chat_id, &payload)).await;
            match published {
                Ok(Ok(())) if self.listener.is_up() => return,
                Ok(Ok(())) => {
                    tracing::warn!(chat_id = %chat_id, "fan-out listener down, delivering locally");
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        chat_id = %chat_id,
                        error = %e,
                        "redis publish failed, delivering locally"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        chat_id = %chat_id,
                        timeout_ms = self.publish_timeout.as_millis() as u64,
                        "redis publish timed out, delivering locally"
                    );
                }
            }
        }

        let delivered = self.registry.publish(chat_id, &payload).await;
        tracing::debug!(chat_id = %chat_id, delivered, "message fanned out");
    }
}
