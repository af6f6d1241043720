//! Message ledger: the ordered message list of the open conversation.
//!
//! Owns the `messages` slice of the client state. Sends are applied
//! optimistically and their realtime echo is matched by message id, so the
//! list never holds the same message twice. Order is always
//! `(created_at, id)` regardless of arrival order.

use std::collections::HashSet;

use tracing::{debug, info};

use murmur_shared::{Attachment, ConversationId, Message, MessageId, MessageView, UserId};

use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;

#[derive(Clone)]
pub(crate) struct MessageLedger {
    ctx: Context,
}

impl MessageLedger {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Fetch the messages of `conversation` with one batched sender lookup.
    ///
    /// The result only reaches the visible list if `conversation` is still
    /// the active one once the fetch resolves. Messages pushed while the
    /// fetch was in flight are kept alongside the fetched ones.
    pub async fn load(&self, conversation: ConversationId) -> Result<Vec<MessageView>> {
        let mut messages = self.ctx.store().list_messages(conversation).await?;
        messages.sort_by_key(Message::sort_key);

        let mut senders: Vec<UserId> = messages.iter().map(|m| m.sender_id).collect();
        senders.sort();
        senders.dedup();
        let profiles = self.ctx.directory.get_users(&senders).await?;

        let views: Vec<MessageView> = messages
            .into_iter()
            .map(|message| MessageView {
                sender: profiles.get(&message.sender_id).cloned(),
                message,
            })
            .collect();

        let merged = self.ctx.state.write(|s| {
            if s.active != Some(conversation) {
                return None;
            }
            let fetched: HashSet<MessageId> = views.iter().map(|m| m.message.id).collect();
            s.messages.retain(|view| !fetched.contains(&view.message.id));
            s.messages.extend(views.iter().cloned());
            s.messages.sort_by_key(|view| view.message.sort_key());
            Some(s.messages.clone())
        });
        match merged {
            Some(messages) => {
                debug!(conversation = %conversation, count = messages.len(), "Messages loaded");
                self.ctx.events.publish(ClientEvent::MessagesChanged(conversation));
                Ok(messages)
            }
            None => {
                debug!(conversation = %conversation, "Discarding stale message load");
                Ok(views)
            }
        }
    }

    /// Write a message and append it to the open list right away.
    pub async fn send(
        &self,
        conversation: ConversationId,
        content: &str,
        attachment: Option<Attachment>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageView> {
        self.validate_content(content, attachment.is_some())?;

        if let Some(target) = reply_to {
            let original = self
                .ctx
                .store()
                .get_message(target)
                .await?
                .ok_or_else(|| ClientError::Validation("reply target does not exist".into()))?;
            if original.conversation_id != conversation {
                return Err(ClientError::Validation(
                    "reply target belongs to another conversation".into(),
                ));
            }
        }

        let message = Message {
            id: MessageId::new(),
            conversation_id: conversation,
            sender_id: self.ctx.me,
            content: content.to_string(),
            created_at: self.ctx.now(),
            read_at: None,
            reply_to,
            edited_at: None,
            liked_by: Default::default(),
            attachment,
        };
        self.ctx.store().insert_message(&message).await?;
        debug!(conversation = %conversation, message = %message.id, "Message sent");

        let sender = self.ctx.directory.get_user(self.ctx.me).await.ok();
        let view = MessageView { message, sender };
        self.insert_view(view.clone());
        Ok(view)
    }

    /// Append a pushed insert unless we already hold that id.
    pub async fn on_remote_insert(&self, message: Message) -> Result<()> {
        let (active, known) = self.ctx.state.read(|s| {
            (
                s.active == Some(message.conversation_id),
                s.messages.iter().any(|m| m.message.id == message.id),
            )
        });
        if !active {
            return Ok(());
        }
        if known {
            debug!(message = %message.id, "Echo of a message already listed");
            return Ok(());
        }

        let sender = self.ctx.directory.get_user(message.sender_id).await.ok();
        let id = message.id;
        if !self.insert_view(MessageView { message, sender }) {
            debug!(message = %id, "Insert raced with a newer state, dropped");
        }
        Ok(())
    }

    /// Replace a listed message by id. Unknown ids are dropped.
    pub fn on_remote_update(&self, message: Message) {
        let conversation = message.conversation_id;
        let id = message.id;
        let replaced = self.ctx.state.write(|s| {
            match s.messages.iter_mut().find(|m| m.message.id == id) {
                Some(existing) => {
                    existing.message = message;
                    true
                }
                None => false,
            }
        });
        if replaced {
            self.ctx.events.publish(ClientEvent::MessagesChanged(conversation));
        } else {
            debug!(message = %id, "Dropping update for unknown message");
        }
    }

    pub fn on_remote_delete(&self, message: &Message) {
        let removed = self.ctx.state.write(|s| {
            let before = s.messages.len();
            s.messages.retain(|m| m.message.id != message.id);
            before != s.messages.len()
        });
        if removed {
            self.ctx
                .events
                .publish(ClientEvent::MessagesChanged(message.conversation_id));
        }
    }

    /// Stamp every unread message of `conversation` as read by `reader`.
    /// Calling it again changes nothing.
    pub async fn mark_read(&self, conversation: ConversationId, reader: UserId) -> Result<usize> {
        let at = self.ctx.now();
        let count = self
            .ctx
            .store()
            .mark_messages_as_read(conversation, reader, at)
            .await?;

        let touched = self.ctx.state.write(|s| {
            if s.active != Some(conversation) {
                return false;
            }
            let mut touched = false;
            for view in s.messages.iter_mut() {
                if view.message.is_unread_for(reader) {
                    view.message.read_at = Some(at);
                    touched = true;
                }
            }
            touched
        });
        if touched {
            self.ctx.events.publish(ClientEvent::MessagesChanged(conversation));
        }

        if count > 0 {
            debug!(conversation = %conversation, count, "Marked messages as read");
        }
        Ok(count)
    }

    /// Replace the content of one of our messages.
    pub async fn edit(&self, id: MessageId, content: &str) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(ClientError::Validation("edited message is empty".into()));
        }
        self.validate_content(content, false)?;

        let updated = self
            .ctx
            .store()
            .update_message_content(id, content, self.ctx.now(), self.ctx.me)
            .await?;
        self.on_remote_update(updated.clone());
        Ok(updated)
    }

    pub async fn toggle_like(&self, id: MessageId) -> Result<Message> {
        let updated = self.ctx.store().toggle_message_like(id, self.ctx.me).await?;
        self.on_remote_update(updated.clone());
        Ok(updated)
    }

    /// Delete one of our messages. Returns the row as it was.
    pub async fn delete(&self, id: MessageId) -> Result<Message> {
        let message = self
            .ctx
            .store()
            .get_message(id)
            .await?
            .ok_or(ClientError::NotFound)?;
        if !self.ctx.store().delete_message(id, self.ctx.me).await? {
            return Err(ClientError::NotFound);
        }
        info!(message = %id, "Message deleted");
        self.on_remote_delete(&message);
        Ok(message)
    }

    /// Put `bytes` in the blob store and describe it for [`Self::send`].
    pub async fn upload_attachment(
        &self,
        conversation: ConversationId,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<Attachment> {
        if bytes.len() > self.ctx.config.max_blob_size {
            return Err(ClientError::Validation(format!(
                "attachment is {} bytes, limit is {}",
                bytes.len(),
                self.ctx.config.max_blob_size
            )));
        }

        let path = format!(
            "attachments/{conversation}/{}-{}",
            uuid::Uuid::new_v4(),
            blob_file_name(file_name)
        );
        let url = self.ctx.backend.blobs.upload(&path, bytes).await?;
        debug!(conversation = %conversation, url = %url, "Attachment uploaded");

        Ok(Attachment {
            url,
            mime_type: mime_type.to_string(),
            file_name: file_name.to_string(),
            size: bytes.len() as u64,
        })
    }

    fn validate_content(&self, content: &str, has_attachment: bool) -> Result<()> {
        if content.trim().is_empty() && !has_attachment {
            return Err(ClientError::Validation("message is empty".into()));
        }
        let max = self.ctx.config.max_message_len;
        if content.chars().count() > max {
            return Err(ClientError::Validation(format!(
                "message is longer than {max} characters"
            )));
        }
        Ok(())
    }

    /// Insert in `(created_at, id)` order if the conversation is open and the
    /// id is new.
    fn insert_view(&self, view: MessageView) -> bool {
        let conversation = view.message.conversation_id;
        let inserted = self.ctx.state.write(|s| {
            if s.active != Some(conversation)
                || s.messages.iter().any(|m| m.message.id == view.message.id)
            {
                return false;
            }
            let key = view.message.sort_key();
            let pos = s.messages.partition_point(|m| m.message.sort_key() < key);
            s.messages.insert(pos, view);
            true
        });
        if inserted {
            self.ctx.events.publish(ClientEvent::MessagesChanged(conversation));
        }
        inserted
    }
}

/// Blob-safe version of a user supplied file name.
fn blob_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
