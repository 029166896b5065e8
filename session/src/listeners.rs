//! Listener bookkeeping shared by wallet provider implementations.
//!
//! A [`Subscription`] owns a [`SubscriptionGuard`]; the listener stays
//! registered exactly as long as the guard lives. Dropping or releasing the
//! guard removes the sender from the registry, after which the receiving
//! side drains and yields `None`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::provider::{EventKind, WalletEvent};

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<u64, (EventKind, mpsc::UnboundedSender<WalletEvent>)>,
}

/// Set of live listeners, keyed by subscription id.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener for `kind`.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut registry = self.lock();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.listeners.insert(id, (kind, tx));
            id
        };
        tracing::trace!(id, ?kind, "listener registered");
        Subscription {
            guard: SubscriptionGuard {
                id,
                kind,
                registry: Some(self.clone()),
            },
            events: rx,
        }
    }

    /// Deliver `event` to every listener of its kind. Returns how many received it.
    pub fn emit(&self, event: WalletEvent) -> usize {
        let kind = event.kind();
        let mut registry = self.lock();
        registry
            .listeners
            .retain(|_, (_, tx)| !tx.is_closed());
        registry
            .listeners
            .values()
            .filter(|(k, _)| *k == kind)
            .filter(|(_, tx)| tx.send(event.clone()).is_ok())
            .count()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock()
            .listeners
            .values()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn total_listeners(&self) -> usize {
        self.lock().listeners.len()
    }

    fn remove(&self, id: u64) {
        if self.lock().listeners.remove(&id).is_some() {
            tracing::trace!(id, "listener removed");
        }
    }
}

/// Keeps a listener registered until dropped or released.
pub struct SubscriptionGuard {
    id: u64,
    kind: EventKind,
    registry: Option<ListenerRegistry>,
}

impl SubscriptionGuard {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Unsubscribe now. Equivalent to dropping the guard.
    pub fn release(mut self) {
        self.unregister();
    }

    fn unregister(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.remove(self.id);
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.registry.is_some())
            .finish()
    }
}

/// A registered listener and the stream of events it receives.
#[derive(Debug)]
pub struct Subscription {
    guard: SubscriptionGuard,
    events: mpsc::UnboundedReceiver<WalletEvent>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.guard.kind
    }

    /// Next event, or `None` once the subscription has been released.
    pub async fn recv(&mut self) -> Option<WalletEvent> {
        self.events.recv().await
    }

    /// Split into the guard and the receiver so they can live in different owners.
    pub fn into_parts(self) -> (SubscriptionGuard, mpsc::UnboundedReceiver<WalletEvent>) {
        (self.guard, self.events)
    }
}
