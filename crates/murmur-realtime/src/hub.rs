//! Row-change fan-out.
//!
//! The hub sits behind the store's change feed. Every event the store emits
//! is routed to each subscription with at least one matching filter, so a
//! write made by one client reaches every other interested client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::debug;

use murmur_shared::{ChangeEvent, ChangeFilter, ChangeSink};

use crate::error::RealtimeError;
use crate::presence::PresenceChannel;

/// What the client core needs from a realtime backend.
pub trait Realtime: Send + Sync {
    /// Receive every change event matching any of `filters`.
    fn subscribe(&self, filters: Vec<ChangeFilter>) -> ChangeSubscription;

    /// Join (or create) the presence channel for `topic`.
    fn presence(&self, topic: &str) -> PresenceChannel;
}

struct Subscriber {
    filters: Vec<ChangeFilter>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

type Subscribers = Mutex<HashMap<u64, Subscriber>>;

#[derive(Default)]
struct HubInner {
    next_id: Mutex<u64>,
    subscribers: Arc<Subscribers>,
    channels: Mutex<HashMap<String, PresenceChannel>>,
}

/// In-process [`Realtime`] implementation. Cheap to clone.
#[derive(Clone, Default)]
pub struct RealtimeHub {
    inner: Arc<HubInner>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live change subscriptions.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }
}

impl Realtime for RealtimeHub {
    fn subscribe(&self, filters: Vec<ChangeFilter>) -> ChangeSubscription {
        let id = {
            let mut next = self.inner.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };

        let (tx, rx) = mpsc::unbounded_channel();
        debug!(subscription = id, filters = filters.len(), "New change subscription");
        lock(&self.inner.subscribers).insert(id, Subscriber { filters, tx });

        ChangeSubscription {
            id,
            rx,
            subscribers: Arc::downgrade(&self.inner.subscribers),
        }
    }

    fn presence(&self, topic: &str) -> PresenceChannel {
        let mut channels = self.inner.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(topic.to_string())
            .or_insert_with(|| {
                debug!(topic, "Opening presence channel");
                PresenceChannel::new(topic)
            })
            .clone()
    }
}

impl ChangeSink for RealtimeHub {
    fn emit(&self, event: ChangeEvent) {
        let mut subscribers = lock(&self.inner.subscribers);
        subscribers.retain(|id, sub| {
            if !sub.filters.iter().any(|f| f.matches(&event)) {
                return true;
            }
            if sub.tx.send(event.clone()).is_err() {
                debug!(subscription = id, "Dropping closed subscription");
                return false;
            }
            true
        });
    }
}

fn lock(subscribers: &Subscribers) -> std::sync::MutexGuard<'_, HashMap<u64, Subscriber>> {
    subscribers.lock().unwrap_or_else(|e| e.into_inner())
}

/// Receiving end of [`Realtime::subscribe`]. Dropping it unsubscribes.
pub struct ChangeSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    subscribers: Weak<Subscribers>,
}

impl ChangeSubscription {
    /// Wait for the next matching event.
    pub async fn recv(&mut self) -> Result<ChangeEvent, RealtimeError> {
        self.rx.recv().await.ok_or(RealtimeError::ChannelClosed)
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            lock(&subscribers).remove(&self.id);
        }
    }
}
