//! The async store seam the client core talks to.
//!
//! [`StoreClient`] is what a remote backend would implement. [`SqliteStore`]
//! implements it over a local [`Database`] and publishes every successful
//! write to an optional [`ChangeSink`], which is how the realtime layer learns
//! about rows written by any client.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_shared::{
    ChangeEvent, ChangeSink, ChatRequest, ConversationId, ConversationRow, GroupUpdate, Message,
    MessageId, Participant, ProfileUpdate, RequestId, RequestStatus, Role, Row, User, UserId,
};
use tracing::debug;

use crate::database::Database;
use crate::error::Result;

#[async_trait]
pub trait StoreClient: Send + Sync {
    // -- users --------------------------------------------------------------
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;
    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>>;
    async fn upsert_user(&self, user: &User) -> Result<()>;
    async fn update_profile(&self, id: UserId, update: &ProfileUpdate) -> Result<User>;
    async fn search_users(&self, prefix: &str, limit: u32) -> Result<Vec<User>>;

    // -- conversations ------------------------------------------------------
    async fn find_direct_conversation(&self, a: UserId, b: UserId)
        -> Result<Option<ConversationRow>>;
    async fn insert_conversation(&self, row: &ConversationRow) -> Result<()>;
    async fn get_conversation(&self, id: ConversationId) -> Result<Option<ConversationRow>>;
    async fn list_direct_conversations(&self, user: UserId) -> Result<Vec<ConversationRow>>;
    async fn list_group_conversations(&self, user: UserId) -> Result<Vec<ConversationRow>>;
    async fn update_group(
        &self,
        id: ConversationId,
        update: &GroupUpdate,
        acting: UserId,
    ) -> Result<ConversationRow>;
    async fn delete_conversation(&self, id: ConversationId, acting: UserId) -> Result<bool>;

    // -- participants -------------------------------------------------------
    async fn insert_participant(&self, participant: &Participant, acting: UserId) -> Result<()>;
    async fn list_participants(&self, conversation: ConversationId) -> Result<Vec<Participant>>;
    async fn get_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<Option<Participant>>;
    async fn update_role(
        &self,
        conversation: ConversationId,
        user: UserId,
        role: Role,
        acting: UserId,
    ) -> Result<Participant>;
    async fn delete_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
        acting: UserId,
    ) -> Result<bool>;

    // -- messages -----------------------------------------------------------
    async fn insert_message(&self, message: &Message) -> Result<()>;
    async fn get_message(&self, id: MessageId) -> Result<Option<Message>>;
    async fn list_messages(&self, conversation: ConversationId) -> Result<Vec<Message>>;
    async fn latest_message(&self, conversation: ConversationId) -> Result<Option<Message>>;
    async fn update_message_content(
        &self,
        id: MessageId,
        content: &str,
        edited_at: DateTime<Utc>,
        acting: UserId,
    ) -> Result<Message>;
    async fn toggle_message_like(&self, id: MessageId, user: UserId) -> Result<Message>;
    async fn delete_message(&self, id: MessageId, acting: UserId) -> Result<bool>;
    /// Bulk read receipt, atomic on the backend. Returns how many rows changed.
    async fn mark_messages_as_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> Result<usize>;
    async fn unread_message_ids(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<Vec<MessageId>>;

    // -- chat requests ------------------------------------------------------
    async fn insert_chat_request(&self, request: &ChatRequest) -> Result<()>;
    async fn get_chat_request(&self, id: RequestId) -> Result<Option<ChatRequest>>;
    async fn find_pending_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> Result<Option<ChatRequest>>;
    async fn latest_denied_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> Result<Option<ChatRequest>>;
    async fn has_accepted_request(&self, a: UserId, b: UserId) -> Result<bool>;
    async fn transition_chat_request(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
        acting: UserId,
    ) -> Result<Option<ChatRequest>>;
    async fn list_chat_requests(&self, user: UserId) -> Result<Vec<ChatRequest>>;
}

/// [`StoreClient`] over a local SQLite [`Database`].
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
    changes: Option<Arc<dyn ChangeSink>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            changes: None,
        }
    }

    /// Publish every successful write to `sink`.
    pub fn with_change_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.changes = Some(sink);
        self
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let guard = self.db.lock().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn emit(&self, event: ChangeEvent) {
        if let Some(sink) = &self.changes {
            debug!(table = %event.table(), kind = ?event.kind, "emitting change");
            sink.emit(event);
        }
    }
}

#[async_trait]
impl StoreClient for SqliteStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.with_db(|db| db.get_user(id))
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        self.with_db(|db| db.get_users(ids))
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        self.with_db(|db| db.upsert_user(user))
    }

    async fn update_profile(&self, id: UserId, update: &ProfileUpdate) -> Result<User> {
        self.with_db(|db| db.update_profile(id, update))
    }

    async fn search_users(&self, prefix: &str, limit: u32) -> Result<Vec<User>> {
        self.with_db(|db| db.search_users(prefix, limit))
    }

    async fn find_direct_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<ConversationRow>> {
        self.with_db(|db| db.find_direct_conversation(a, b))
    }

    async fn insert_conversation(&self, row: &ConversationRow) -> Result<()> {
        self.with_db(|db| db.insert_conversation(row))?;
        self.emit(ChangeEvent::insert(Row::Conversation(row.clone())));
        Ok(())
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<ConversationRow>> {
        self.with_db(|db| db.get_conversation(id))
    }

    async fn list_direct_conversations(&self, user: UserId) -> Result<Vec<ConversationRow>> {
        self.with_db(|db| db.list_direct_conversations(user))
    }

    async fn list_group_conversations(&self, user: UserId) -> Result<Vec<ConversationRow>> {
        self.with_db(|db| db.list_group_conversations(user))
    }

    async fn update_group(
        &self,
        id: ConversationId,
        update: &GroupUpdate,
        acting: UserId,
    ) -> Result<ConversationRow> {
        let row = self.with_db(|db| db.update_group(id, update, acting))?;
        self.emit(ChangeEvent::update(Row::Conversation(row.clone())));
        Ok(row)
    }

    async fn delete_conversation(&self, id: ConversationId, acting: UserId) -> Result<bool> {
        let deleted = self.with_db(|db| db.delete_conversation(id, acting))?;
        match deleted {
            Some(row) => {
                self.emit(ChangeEvent::delete(Row::Conversation(row)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_participant(&self, participant: &Participant, acting: UserId) -> Result<()> {
        self.with_db(|db| db.insert_participant(participant, acting))?;
        self.emit(ChangeEvent::insert(Row::Participant(participant.clone())));
        Ok(())
    }

    async fn list_participants(&self, conversation: ConversationId) -> Result<Vec<Participant>> {
        self.with_db(|db| db.list_participants(conversation))
    }

    async fn get_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<Option<Participant>> {
        self.with_db(|db| db.get_participant(conversation, user))
    }

    async fn update_role(
        &self,
        conversation: ConversationId,
        user: UserId,
        role: Role,
        acting: UserId,
    ) -> Result<Participant> {
        let participant = self.with_db(|db| db.update_role(conversation, user, role, acting))?;
        self.emit(ChangeEvent::update(Row::Participant(participant.clone())));
        Ok(participant)
    }

    async fn delete_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
        acting: UserId,
    ) -> Result<bool> {
        let removed = self.with_db(|db| db.delete_participant(conversation, user, acting))?;
        match removed {
            Some(participant) => {
                self.emit(ChangeEvent::delete(Row::Participant(participant)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_db(|db| db.insert_message(message))?;
        self.emit(ChangeEvent::insert(Row::Message(message.clone())));
        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        self.with_db(|db| db.get_message(id))
    }

    async fn list_messages(&self, conversation: ConversationId) -> Result<Vec<Message>> {
        self.with_db(|db| db.list_messages(conversation))
    }

    async fn latest_message(&self, conversation: ConversationId) -> Result<Option<Message>> {
        self.with_db(|db| db.latest_message(conversation))
    }

    async fn update_message_content(
        &self,
        id: MessageId,
        content: &str,
        edited_at: DateTime<Utc>,
        acting: UserId,
    ) -> Result<Message> {
        let message = self.with_db(|db| db.update_message_content(id, content, edited_at, acting))?;
        self.emit(ChangeEvent::update(Row::Message(message.clone())));
        Ok(message)
    }

    async fn toggle_message_like(&self, id: MessageId, user: UserId) -> Result<Message> {
        let message = self.with_db(|db| db.toggle_message_like(id, user))?;
        self.emit(ChangeEvent::update(Row::Message(message.clone())));
        Ok(message)
    }

    async fn delete_message(&self, id: MessageId, acting: UserId) -> Result<bool> {
        let deleted = self.with_db(|db| db.delete_message(id, acting))?;
        match deleted {
            Some(message) => {
                self.emit(ChangeEvent::delete(Row::Message(message)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_messages_as_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let updated = self.with_db(|db| db.mark_messages_as_read(conversation, reader, at))?;
        let count = updated.len();
        for message in updated {
            self.emit(ChangeEvent::update(Row::Message(message)));
        }
        Ok(count)
    }

    async fn unread_message_ids(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<Vec<MessageId>> {
        self.with_db(|db| db.unread_message_ids(conversation, reader))
    }

    async fn insert_chat_request(&self, request: &ChatRequest) -> Result<()> {
        self.with_db(|db| db.insert_chat_request(request))?;
        self.emit(ChangeEvent::insert(Row::ChatRequest(request.clone())));
        Ok(())
    }

    async fn get_chat_request(&self, id: RequestId) -> Result<Option<ChatRequest>> {
        self.with_db(|db| db.get_chat_request(id))
    }

    async fn find_pending_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> Result<Option<ChatRequest>> {
        self.with_db(|db| db.find_pending_request(requester, recipient))
    }

    async fn latest_denied_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> Result<Option<ChatRequest>> {
        self.with_db(|db| db.latest_denied_request(requester, recipient))
    }

    async fn has_accepted_request(&self, a: UserId, b: UserId) -> Result<bool> {
        self.with_db(|db| db.has_accepted_request(a, b))
    }

    async fn transition_chat_request(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
        acting: UserId,
    ) -> Result<Option<ChatRequest>> {
        let moved = self.with_db(|db| db.transition_chat_request(id, from, to, at, acting))?;
        if let Some(request) = &moved {
            self.emit(ChangeEvent::update(Row::ChatRequest(request.clone())));
        }
        Ok(moved)
    }

    async fn list_chat_requests(&self, user: UserId) -> Result<Vec<ChatRequest>> {
        self.with_db(|db| db.list_chat_requests(user))
    }
}
