//! Subscription registry: which connections want change notifications for
//! which flags.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ipc::channel::FrameSender;

/// Identity of one server-side connection.
pub type ConnectionId = Uuid;

/// A subscribed connection: its identity, the queue its frames go to, and
/// the token that ends its session.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: FrameSender,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Pair a connection id with its outbound queue.
    #[must_use]
    pub fn new(id: ConnectionId, sender: FrameSender) -> Self {
        Self::with_shutdown(id, sender, CancellationToken::new())
    }

    /// Pair a connection id with its outbound queue and session token.
    #[must_use]
    pub fn with_shutdown(
        id: ConnectionId,
        sender: FrameSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            sender,
            shutdown,
        }
    }

    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Outbound queue for this connection.
    #[must_use]
    pub fn sender(&self) -> &FrameSender {
        &self.sender
    }

    /// Token cancelled when the session must end.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Ask the session serving this connection to close it.
    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`ConnectionHandle::disconnect`] has been requested.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Mapping from flag name to the connections subscribed to it.
///
/// Keyed by [`ConnectionId`] so a connection appears at most once per flag.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<String, HashMap<ConnectionId, ConnectionHandle>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `connection` to `name`. Idempotent.
    pub fn subscribe(&self, name: &str, connection: &ConnectionHandle) {
        self.subscriptions
            .write()
            .entry(name.to_owned())
            .or_default()
            .entry(connection.id)
            .or_insert_with(|| connection.clone());
    }

    /// Remove `id` from the subscribers of `name`; no-op if absent.
    ///
    /// Returns whether a subscription was removed.
    pub fn unsubscribe(&self, name: &str, id: ConnectionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let Some(subscribers) = subscriptions.get_mut(name) else {
            return false;
        };
        let removed = subscribers.remove(&id).is_some();
        if subscribers.is_empty() {
            subscriptions.remove(name);
        }
        removed
    }

    /// Snapshot of the subscribers of `name` for fan-out.
    ///
    /// The lock is released before returning, so delivering to the snapshot
    /// never blocks concurrent subscribe/unsubscribe calls.
    #[must_use]
    pub fn subscribers_of(&self, name: &str) -> Vec<ConnectionHandle> {
        self.subscriptions
            .read()
            .get(name)
            .map(|subscribers| {
                subscribers.values().cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Drop `id` from every flag. Returns how many subscriptions were removed.
    pub fn remove_connection(&self, id: ConnectionId) -> usize {
        let mut subscriptions = self.subscriptions.write();
        let mut removed = 0;
        subscriptions.retain(|_, subscribers| {
            if subscribers.remove(&id).is_some() {
                removed += 1;
            }
            !subscribers.is_empty()
        });
        removed
    }

    /// Whether `id` is subscribed to `name`.
    #[must_use]
    pub fn is_subscribed(&self, name: &str, id: ConnectionId) -> bool {
        self.subscriptions
            .read()
            .get(name)
            .is_some_and(|subscribers| subscribers.contains_key(&id))
    }

    /// Number of subscribers of `name`.
    #[must_use]
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.subscriptions.read().get(name).map_or(0, HashMap::len)
    }
}
