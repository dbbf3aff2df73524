//! Pending-request table for correlating responses with callers.
//!
//! Each outstanding request is registered under `(command, correlation
//! token)` together with a `oneshot` sender. Registering a key that is
//! already present displaces the earlier caller, who is told so through
//! [`Reply::Superseded`]. Every registration carries a ticket so a caller's
//! cleanup can never remove a registration that replaced its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::protocol::Command;

/// Key a response is correlated under.
pub type PendingKey = (Command, String);

/// Value delivered to a waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `SUCCESS` with its trailing payload (`flag` or `flag:value`).
    Success(String),
    /// `ERROR` with the server-supplied message.
    Failure(String),
    /// An identical request was registered before this one was answered.
    Superseded,
}

#[derive(Debug)]
struct Slot {
    ticket: u64,
    tx: oneshot::Sender<Reply>,
}

/// Registration handle returned by [`PendingRequests::register`].
#[derive(Debug)]
pub struct Registration {
    /// Key the request waits under.
    pub key: PendingKey,
    /// Identifies this registration among successive ones for the same key.
    pub ticket: u64,
    /// Resolves with the correlated reply. Errors if the table is cleared.
    pub rx: oneshot::Receiver<Reply>,
}

/// Thread-safe table of outstanding requests.
#[derive(Debug, Default)]
pub struct PendingRequests {
    next_ticket: AtomicU64,
    slots: Mutex<HashMap<PendingKey, Slot>>,
}

impl PendingRequests {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `key`, displacing any existing one.
    pub async fn register(&self, key: PendingKey) -> Registration {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let displaced = {
            let mut slots = self.slots.lock().await;
            slots.insert(key.clone(), Slot { ticket, tx })
        };

        if let Some(previous) = displaced {
            debug!(command = %key.0, token = %key.1, "pending request superseded");
            let _ = previous.tx.send(Reply::Superseded);
        }

        Registration { key, ticket, rx }
    }

    /// Deliver `reply` to the waiter for `key`, removing it.
    ///
    /// Returns `false` if nothing is waiting under `key`.
    pub async fn resolve(&self, key: &PendingKey, reply: Reply) -> bool {
        let slot = self.slots.lock().await.remove(key);
        match slot {
            Some(slot) => {
                if slot.tx.send(reply).is_err() {
                    debug!(command = %key.0, token = %key.1, "waiter gone before reply arrived");
                }
                true
            }
            None => false,
        }
    }

    /// Deliver `reply` to the first waiter for `command` whose token is
    /// `flag` itself or starts with `flag:`.
    ///
    /// Used for `ERROR` responses, which name the flag but not the value a
    /// `SET`/`CHANGE` request was keyed by.
    pub async fn resolve_for_flag(&self, command: Command, flag: &str, reply: Reply) -> bool {
        let prefix = format!("{flag}:");
        let slot = {
            let mut slots = self.slots.lock().await;
            let key = slots
                .keys()
                .find(|(pending_command, token)| {
                    *pending_command == command && (token == flag || token.starts_with(&prefix))
                })
                .cloned();
            key.and_then(|key| slots.remove(&key))
        };

        match slot {
            Some(slot) => {
                let _ = slot.tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Remove the registration for `key` if it still belongs to `ticket`.
    pub async fn release(&self, key: &PendingKey, ticket: u64) {
        let mut slots = self.slots.lock().await;
        if slots.get(key).is_some_and(|slot| slot.ticket == ticket) {
            slots.remove(key);
        }
    }

    /// Drop every registration; waiters observe a closed channel.
    ///
    /// Returns how many requests were outstanding.
    pub async fn fail_all(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let count = slots.len();
        slots.clear();
        count
    }

    /// Whether a waiter is registered under `key`.
    pub async fn contains(&self, key: &PendingKey) -> bool {
        self.slots.lock().await.contains_key(key)
    }

    /// Number of outstanding requests.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Whether no request is outstanding.
    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}
