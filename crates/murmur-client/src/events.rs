//! Change notifications for the UI layer.
//!
//! Events carry no data beyond which slice of [`crate::ClientState`] moved;
//! a listener re-reads the matching getter on [`crate::ChatClient`].

use tokio::sync::broadcast;

use murmur_shared::ConversationId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ConversationsChanged,
    /// The active message list changed.
    MessagesChanged(ConversationId),
    UnreadChanged,
    PresenceChanged,
    TypingChanged(ConversationId),
    ChatRequestsChanged,
}

pub type EventReceiver = broadcast::Receiver<ClientEvent>;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(size: usize) -> Self {
        let (tx, _) = broadcast::channel(size);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
