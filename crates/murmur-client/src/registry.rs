//! Conversation registry: the list of conversations the user belongs to.
//!
//! Owns the `conversations`, `active` and `unread` slices of the client
//! state. Remote changes are merged by conversation id, so hearing about the
//! same conversation twice (a fetch after accept plus its push event) never
//! produces a second entry.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use murmur_shared::{
    ChangeEvent, ChangeKind, Conversation, ConversationId, ConversationKind, ConversationRow,
    Member, Message, MessageId, Row, UserId,
};
use murmur_store::StoreError;

use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;

#[derive(Clone)]
pub(crate) struct ConversationRegistry {
    ctx: Context,
}

impl ConversationRegistry {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Fetch every direct and group conversation of `user` and rebuild the
    /// list and the unread counters from scratch.
    ///
    /// Conversations merged by a push while the fetch was in flight are kept
    /// even when the fetch missed them.
    pub async fn load(&self, user: UserId) -> Result<Vec<Conversation>> {
        let before: HashSet<ConversationId> =
            self.ctx.state.read(|s| s.conversations.iter().map(|c| c.id).collect());
        let store = self.ctx.store();
        let mut rows = store.list_direct_conversations(user).await?;
        rows.extend(store.list_group_conversations(user).await?);

        let mut conversations = Vec::with_capacity(rows.len());
        let mut unread = HashMap::new();
        for row in rows {
            let id = row.id;
            match self.hydrate(row, user).await {
                Ok(conversation) => conversations.push(conversation),
                Err(ClientError::NotFound) => {
                    debug!(conversation = %id, "Skipping conversation with missing data");
                    continue;
                }
                Err(e) => return Err(e),
            }
            let ids = store.unread_message_ids(id, user).await?;
            if !ids.is_empty() {
                unread.insert(id, ids.into_iter().collect::<HashSet<_>>());
            }
        }

        let (conversations, active_dropped) = self.ctx.state.write(|s| {
            let fetched: HashSet<ConversationId> = conversations.iter().map(|c| c.id).collect();
            for arrived in s
                .conversations
                .drain(..)
                .filter(|c| !before.contains(&c.id) && !fetched.contains(&c.id))
            {
                if let Some(ids) = s.unread.remove(&arrived.id) {
                    unread.insert(arrived.id, ids);
                }
                conversations.push(arrived);
            }
            sort_by_activity(&mut conversations);
            s.conversations = conversations.clone();
            s.unread = unread;
            let dropped = match s.active {
                Some(active) if s.conversation(active).is_none() => {
                    s.active = None;
                    s.messages.clear();
                    true
                }
                _ => false,
            };
            (conversations, dropped)
        });
        if active_dropped {
            debug!("Active conversation no longer listed");
        }

        info!(count = conversations.len(), "Conversations loaded");
        self.ctx.events.publish(ClientEvent::ConversationsChanged);
        self.ctx.events.publish(ClientEvent::UnreadChanged);
        Ok(conversations)
    }

    /// Return the direct conversation between `user` and `other`, creating it
    /// only when none exists. Safe to race: losing the insert race fetches
    /// the winner's row.
    pub async fn create(&self, user: UserId, other: UserId) -> Result<Conversation> {
        if user == other {
            return Err(ClientError::Validation(
                "cannot open a conversation with yourself".into(),
            ));
        }
        self.ctx.directory.get_user(other).await?;

        let store = self.ctx.store();
        let row = match store.find_direct_conversation(user, other).await? {
            Some(existing) => {
                debug!(conversation = %existing.id, "Direct conversation already exists");
                existing
            }
            None => {
                let row = ConversationRow::direct(user, other, self.ctx.now());
                match store.insert_conversation(&row).await {
                    Ok(()) => {
                        info!(conversation = %row.id, other = %other, "Direct conversation created");
                        row
                    }
                    Err(StoreError::UniqueViolation(_)) => {
                        debug!(other = %other, "Lost creation race, fetching existing row");
                        store
                            .find_direct_conversation(user, other)
                            .await?
                            .ok_or(ClientError::NotFound)?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let conversation = self.hydrate(row, user).await?;
        self.adopt(conversation.clone()).await?;
        Ok(conversation)
    }

    /// Merge a raw change notification into the list.
    pub async fn on_remote_change(&self, event: &ChangeEvent) -> Result<()> {
        let me = self.ctx.me;
        match (event.kind, &event.row) {
            (ChangeKind::Delete, Row::Conversation(row)) => self.forget(row.id),
            (_, Row::Conversation(row)) => {
                if row.is_direct_party(me) || self.knows(row.id) {
                    self.refresh(row.id).await?;
                } else {
                    debug!(conversation = %row.id, "Ignoring change to unrelated conversation");
                }
            }
            (ChangeKind::Delete, Row::Participant(p)) if p.user_id == me => {
                self.forget(p.conversation_id)
            }
            (_, Row::Participant(p)) => {
                if p.user_id == me || self.knows(p.conversation_id) {
                    self.refresh(p.conversation_id).await?;
                }
            }
            (ChangeKind::Insert, Row::Message(message)) => {
                self.note_message(message);
                self.note_unread(message);
            }
            (ChangeKind::Update, Row::Message(message)) => {
                self.note_message(message);
                if !message.is_unread_for(me) {
                    self.drop_unread(message.conversation_id, message);
                }
            }
            (ChangeKind::Delete, Row::Message(message)) => {
                self.note_message_deleted(message).await?;
            }
            (_, Row::ChatRequest(_)) => {}
        }
        Ok(())
    }

    /// Make `id` the open conversation. The message list is emptied until
    /// the ledger loads it.
    pub fn select(&self, id: ConversationId) -> Result<()> {
        let found = self.ctx.state.write(|s| {
            if s.conversation(id).is_none() {
                return false;
            }
            s.active = Some(id);
            s.messages.clear();
            true
        });
        if !found {
            return Err(ClientError::NotFound);
        }
        debug!(conversation = %id, "Conversation selected");
        self.ctx.events.publish(ClientEvent::MessagesChanged(id));
        Ok(())
    }

    pub fn knows(&self, id: ConversationId) -> bool {
        self.ctx.state.read(|s| s.conversation(id).is_some())
    }

    /// Re-read one conversation from the store and merge it. Drops it from
    /// the list when it is gone or the user is no longer a participant.
    /// A conversation seen for the first time gets its unread set computed.
    pub async fn refresh(&self, id: ConversationId) -> Result<Option<Conversation>> {
        let Some(row) = self.ctx.store().get_conversation(id).await? else {
            self.forget(id);
            return Ok(None);
        };

        let conversation = self.hydrate(row, self.ctx.me).await?;
        if conversation.is_group() && conversation.role_of(self.ctx.me).is_none() {
            self.forget(id);
            return Ok(None);
        }

        self.adopt(conversation.clone()).await?;
        Ok(Some(conversation))
    }

    /// [`Self::merge`], seeding the unread set when the conversation is new
    /// to the list.
    async fn adopt(&self, conversation: Conversation) -> Result<()> {
        let id = conversation.id;
        if self.knows(id) {
            self.merge(conversation);
            return Ok(());
        }

        let ids = self.ctx.store().unread_message_ids(id, self.ctx.me).await?;
        self.merge(conversation);
        let seeded = self.ctx.state.write(|s| {
            if ids.is_empty() || s.active == Some(id) || s.conversation(id).is_none() {
                return false;
            }
            s.unread.entry(id).or_default().extend(ids);
            true
        });
        if seeded {
            self.ctx.events.publish(ClientEvent::UnreadChanged);
        }
        Ok(())
    }

    /// Patch in place when known, otherwise prepend.
    pub fn merge(&self, conversation: Conversation) {
        let id = conversation.id;
        let inserted = self.ctx.state.write(|s| {
            match s.conversations.iter_mut().find(|c| c.id == id) {
                Some(existing) => {
                    *existing = conversation;
                    false
                }
                None => {
                    s.conversations.insert(0, conversation);
                    true
                }
            }
        });
        debug!(conversation = %id, inserted, "Merged conversation");
        self.ctx.events.publish(ClientEvent::ConversationsChanged);
    }

    pub fn forget(&self, id: ConversationId) {
        let (removed, was_active) = self.ctx.state.write(|s| {
            let before = s.conversations.len();
            s.conversations.retain(|c| c.id != id);
            s.unread.remove(&id);
            let was_active = s.active == Some(id);
            if was_active {
                s.active = None;
                s.messages.clear();
            }
            (before != s.conversations.len(), was_active)
        });
        if removed {
            debug!(conversation = %id, "Conversation removed");
            self.ctx.events.publish(ClientEvent::ConversationsChanged);
        }
        if was_active {
            self.ctx.events.publish(ClientEvent::MessagesChanged(id));
        }
    }

    /// Derived update: a new or changed message refreshes its conversation's
    /// last-message summary and position.
    pub fn note_message(&self, message: &Message) {
        let changed = self.ctx.state.write(|s| {
            let Some(pos) = s
                .conversations
                .iter()
                .position(|c| c.id == message.conversation_id)
            else {
                return false;
            };
            let (same, older) = match &s.conversations[pos].last_message {
                Some(last) => (last.id == message.id, last.sort_key() > message.sort_key()),
                None => (false, false),
            };
            if older && !same {
                return false;
            }
            s.conversations[pos].last_message = Some(message.clone());
            sort_by_activity(&mut s.conversations);
            true
        });
        if changed {
            self.ctx.events.publish(ClientEvent::ConversationsChanged);
        }
    }

    /// Count `message` as unread unless its conversation is open or we sent it.
    pub fn note_unread(&self, message: &Message) {
        let me = self.ctx.me;
        if !message.is_unread_for(me) {
            return;
        }
        let counted = self.ctx.state.write(|s| {
            if s.active == Some(message.conversation_id)
                || s.conversation(message.conversation_id).is_none()
            {
                return false;
            }
            s.unread
                .entry(message.conversation_id)
                .or_default()
                .insert(message.id)
        });
        if counted {
            self.ctx.events.publish(ClientEvent::UnreadChanged);
        }
    }

    fn drop_unread(&self, conversation: ConversationId, message: &Message) {
        let removed = self.ctx.state.write(|s| {
            s.unread
                .get_mut(&conversation)
                .map_or(false, |ids| ids.remove(&message.id))
        });
        if removed {
            self.ctx.events.publish(ClientEvent::UnreadChanged);
        }
    }

    /// Replace the unread set of `conversation` with the store's view.
    /// Skipped for the open conversation, which is read on sight.
    pub async fn recount(&self, conversation: ConversationId) -> Result<()> {
        let ids = self
            .ctx
            .store()
            .unread_message_ids(conversation, self.ctx.me)
            .await?;
        let changed = self.ctx.state.write(|s| {
            if s.active == Some(conversation) || s.conversation(conversation).is_none() {
                return false;
            }
            let ids: HashSet<MessageId> = ids.into_iter().collect();
            let previous = if ids.is_empty() {
                s.unread.remove(&conversation)
            } else {
                s.unread.insert(conversation, ids.clone())
            };
            previous.unwrap_or_default() != ids
        });
        if changed {
            self.ctx.events.publish(ClientEvent::UnreadChanged);
        }
        Ok(())
    }

    pub fn clear_unread(&self, conversation: ConversationId) {
        let cleared = self
            .ctx
            .state
            .write(|s| s.unread.remove(&conversation).is_some());
        if cleared {
            self.ctx.events.publish(ClientEvent::UnreadChanged);
        }
    }

    /// A deleted message leaves the unread set, and if it was the summary the
    /// next most recent message takes its place.
    pub async fn note_message_deleted(&self, message: &Message) -> Result<()> {
        self.drop_unread(message.conversation_id, message);

        let was_last = self.ctx.state.read(|s| {
            s.conversation(message.conversation_id)
                .and_then(|c| c.last_message.as_ref())
                .map_or(false, |last| last.id == message.id)
        });
        if !was_last {
            return Ok(());
        }

        let latest = self
            .ctx
            .store()
            .latest_message(message.conversation_id)
            .await?;
        self.ctx.state.write(|s| {
            if let Some(c) = s
                .conversations
                .iter_mut()
                .find(|c| c.id == message.conversation_id)
            {
                c.last_message = latest;
            }
            sort_by_activity(&mut s.conversations);
        });
        self.ctx.events.publish(ClientEvent::ConversationsChanged);
        Ok(())
    }

    /// Attach the latest message and the other party or the roster.
    async fn hydrate(&self, row: ConversationRow, viewer: UserId) -> Result<Conversation> {
        let last_message = self.ctx.store().latest_message(row.id).await?;

        let kind = if row.is_group {
            let roster = self.ctx.store().list_participants(row.id).await?;
            let ids: Vec<UserId> = roster.iter().map(|p| p.user_id).collect();
            let users = self.ctx.directory.get_users(&ids).await?;
            let participants = roster
                .into_iter()
                .filter_map(|p| match users.get(&p.user_id) {
                    Some(user) => Some(Member {
                        user: user.clone(),
                        role: p.role,
                        joined_at: p.joined_at,
                    }),
                    None => {
                        debug!(user = %p.user_id, "Participant without profile");
                        None
                    }
                })
                .collect();
            ConversationKind::Group {
                name: row.name.unwrap_or_default(),
                icon_url: row.icon_url,
                created_by: row.created_by,
                participants,
            }
        } else {
            let other = row.other_party(viewer).ok_or(ClientError::NotFound)?;
            ConversationKind::Direct {
                other_user: self.ctx.directory.get_user(other).await?,
            }
        };

        Ok(Conversation {
            id: row.id,
            created_at: row.created_at,
            kind,
            last_message,
        })
    }
}

/// Most recent activity first; ties broken by id for a stable order.
pub(crate) fn sort_by_activity(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| {
        b.activity_at()
            .cmp(&a.activity_at())
            .then_with(|| b.id.cmp(&a.id))
    });
}
