//! The client's local view of the world.
//!
//! One [`ClientState`] per client, behind [`SharedState`]. Each slice has a
//! single owner that merges into it: the registry owns `conversations`,
//! `active` and `unread`, the ledger owns `messages`, the presence tracker
//! owns `online` and `typing`, the request state machine owns `requests`.
//! Event handlers always read the state at the moment they run.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use murmur_shared::{ChatRequest, Conversation, ConversationId, MessageId, MessageView, UserId};

#[derive(Debug, Default, Clone)]
pub struct ClientState {
    /// Most recent activity first.
    pub conversations: Vec<Conversation>,
    pub active: Option<ConversationId>,
    /// Messages of the active conversation, ordered by (created_at, id).
    pub messages: Vec<MessageView>,
    /// Unread message ids per conversation. A set, so a duplicate event
    /// never counts twice.
    pub unread: HashMap<ConversationId, HashSet<MessageId>>,
    pub online: BTreeSet<UserId>,
    /// Who is typing, per conversation, never including ourselves.
    pub typing: HashMap<ConversationId, BTreeSet<UserId>>,
    pub requests: Vec<ChatRequest>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn unread_count(&self, id: ConversationId) -> usize {
        self.unread.get(&id).map_or(0, HashSet::len)
    }

    pub fn unread_counts(&self) -> HashMap<ConversationId, usize> {
        self.conversations
            .iter()
            .map(|c| (c.id, self.unread_count(c.id)))
            .collect()
    }
}

/// Shared handle to the [`ClientState`].
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<ClientState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<T>(&self, f: impl FnOnce(&ClientState) -> T) -> T {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    pub fn write<T>(&self, f: impl FnOnce(&mut ClientState) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn snapshot(&self) -> ClientState {
        self.read(ClientState::clone)
    }
}
