//! Listener registry.
//!
//! Tracks active listeners and fans change events out to the ones watching
//! the affected collection.

use std::sync::Arc;

use dashmap::DashMap;
use liveset_engine::ChangeEvent;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

/// What a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A committed write on the listener's collection
    Change(ChangeEvent),
    /// At least one event was dropped on a full queue. The receiver must
    /// re-evaluate without knowing which record changed.
    Lagged,
}

/// A registered listener's sending side.
#[derive(Debug)]
struct Registration {
    collection: String,
    sender: mpsc::Sender<ChangeEvent>,
    /// Holds a permit while dropped events are unreported
    lagged: Arc<Notify>,
}

/// Fans change events out to listeners.
///
/// Thread-safe and shared across handlers via `Arc`. Publishing never
/// waits on a listener.
#[derive(Debug)]
pub struct Notifier {
    /// All active listeners, keyed by listener ID.
    listeners: DashMap<String, Registration>,
    /// Index of listener IDs by collection.
    by_collection: DashMap<String, Vec<String>>,
    /// Capacity of each listener's queue.
    buffer: usize,
}

impl Notifier {
    /// Create a notifier whose listeners each buffer up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            listeners: DashMap::new(),
            by_collection: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Create a new notifier wrapped in Arc for sharing.
    pub fn new_shared(buffer: usize) -> Arc<Self> {
        Arc::new(Self::new(buffer))
    }

    /// Register a listener for events on `collection`.
    ///
    /// The listener unsubscribes itself when dropped.
    pub fn subscribe(self: &Arc<Self>, collection: &str) -> Listener {
        let id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(self.buffer);
        let lagged = Arc::new(Notify::new());

        self.listeners.insert(
            id.clone(),
            Registration {
                collection: collection.to_string(),
                sender,
                lagged: Arc::clone(&lagged),
            },
        );
        self.by_collection
            .entry(collection.to_string())
            .or_default()
            .push(id.clone());

        tracing::debug!(listener_id = %id, collection = %collection, "Listener subscribed");

        Listener {
            id,
            receiver,
            lagged,
            notifier: Arc::clone(self),
        }
    }

    /// Remove a listener. Unknown IDs are ignored.
    pub fn unsubscribe(&self, listener_id: &str) {
        if let Some((_, registration)) = self.listeners.remove(listener_id) {
            if let Some(mut ids) = self.by_collection.get_mut(&registration.collection) {
                ids.retain(|id| id != listener_id);
                if ids.is_empty() {
                    drop(ids);
                    self.by_collection
                        .remove_if(&registration.collection, |_, ids| ids.is_empty());
                }
            }

            tracing::debug!(
                listener_id = %listener_id,
                collection = %registration.collection,
                "Listener unsubscribed"
            );
        }
    }

    /// Deliver `event` to every listener on its collection.
    ///
    /// A listener whose queue is full misses this event and is marked lagged
    /// instead, so it still re-evaluates after draining its queue. Returns the number of listeners the event was queued for.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let ids = match self.by_collection.get(&event.collection) {
            Some(ids) => ids.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut closed = Vec::new();

        for id in ids {
            let Some(registration) = self.listeners.get(&id) else {
                continue;
            };

            match registration.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    registration.lagged.notify_one();
                    tracing::trace!(listener_id = %id, "Listener queue full, marked lagged");
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        for id in closed {
            self.unsubscribe(&id);
        }

        tracing::debug!(
            collection = %event.collection,
            id = %event.id,
            kind = ?event.kind,
            recipients = delivered,
            "Published change"
        );

        delivered
    }

    /// Get the number of active listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Get the number of collections with at least one listener.
    pub fn collection_count(&self) -> usize {
        self.by_collection.len()
    }
}

/// Receiving side of a subscription.
#[derive(Debug)]
pub struct Listener {
    id: String,
    receiver: mpsc::Receiver<ChangeEvent>,
    lagged: Arc<Notify>,
    notifier: Arc<Notifier>,
}

impl Listener {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next notification. Queued events come first; a lag is
    /// reported once the queue is drained. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Notification> {
        tokio::select! {
            biased;
            event = self.receiver.recv() => event.map(Notification::Change),
            _ = self.lagged.notified() => Some(Notification::Lagged),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.notifier.unsubscribe(&self.id);
    }
}
