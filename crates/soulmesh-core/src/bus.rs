//! Explicit publish/subscribe for protocol events.
//!
//! Delivery is at-least-once from the publisher's point of view and carries no
//! ordering guarantee across nodes. Handlers run synchronously on the
//! publishing thread, so a handler must not block. Channel subscribers get a
//! bounded queue; when it is full the event is dropped for that subscriber and
//! a warning is logged instead of stalling the publisher.

use crate::events::{EventKind, MeshEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Callback invoked for every event published on a topic.
pub type EventHandler = Arc<dyn Fn(&MeshEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Subscriber {
    Handler(EventHandler),
    Channel(mpsc::Sender<MeshEvent>),
}

/// Topic-keyed fan-out of [`MeshEvent`]s.
///
/// Cloning is cheap and every clone shares the same subscriptions, so one bus
/// is constructed per node process and handed to each component.
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<RwLock<HashMap<EventKind, Vec<(SubscriptionId, Subscriber)>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one topic.
    pub fn subscribe<F>(&self, topic: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&MeshEvent) + Send + Sync + 'static,
    {
        self.insert(topic, Subscriber::Handler(Arc::new(handler)))
    }

    /// Register a callback for every topic.
    pub fn subscribe_all<F>(&self, handler: F) -> Vec<SubscriptionId>
    where
        F: Fn(&MeshEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        EventKind::ALL
            .iter()
            .map(|topic| self.insert(*topic, Subscriber::Handler(handler.clone())))
            .collect()
    }

    /// Receive a topic's events through a bounded channel.
    pub fn subscribe_channel(
        &self,
        topic: EventKind,
        capacity: usize,
    ) -> (SubscriptionId, mpsc::Receiver<MeshEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.insert(topic, Subscriber::Channel(tx)), rx)
    }

    /// Remove a subscription. Returns false when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write();
        let mut removed = false;
        for subscribers in topics.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|(sid, _)| *sid != id);
            removed |= subscribers.len() != before;
        }
        removed
    }

    /// Publish an event on an explicit topic, returning how many subscribers
    /// accepted it.
    pub fn publish(&self, topic: EventKind, payload: &MeshEvent) -> usize {
        if topic != payload.kind() {
            debug!(%topic, kind = %payload.kind(), "publishing event under a foreign topic");
        }

        // Handlers may publish again; never call them while holding the lock.
        let targets: Vec<_> = {
            let topics = self.topics.read();
            match topics.get(&topic) {
                Some(subscribers) => subscribers.clone(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, subscriber) in targets {
            match subscriber {
                Subscriber::Handler(handler) => {
                    handler(payload);
                    delivered += 1;
                }
                Subscriber::Channel(tx) => match tx.try_send(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(%topic, ?id, "subscriber queue full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
                },
            }
        }

        for id in closed {
            debug!(%topic, ?id, "removing closed channel subscriber");
            self.unsubscribe(id);
        }
        delivered
    }

    /// Publish an event under its own topic.
    pub fn emit(&self, event: MeshEvent) -> usize {
        self.publish(event.kind(), &event)
    }

    pub fn subscriber_count(&self, topic: EventKind) -> usize {
        self.topics.read().get(&topic).map_or(0, Vec::len)
    }

    fn insert(&self, topic: EventKind, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.topics
            .write()
            .entry(topic)
            .or_default()
            .push((id, subscriber));
        id
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics.read();
        f.debug_struct("EventBus")
            .field("topics", &topics.keys().collect::<Vec<_>>())
            .finish()
    }
}
