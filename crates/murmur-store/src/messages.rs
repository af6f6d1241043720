//! CRUD operations for [`Message`] records, including the bulk read-receipt
//! update.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use murmur_shared::{Attachment, ConversationId, Message, MessageId, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::sql::{conversion_err, parse_id, parse_opt_id, parse_opt_ts, parse_ts, ts};

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, created_at, read_at, \
     reply_to, edited_at, liked_by, attachment_url, attachment_mime, attachment_name, attachment_size";

impl Database {
    /// Insert a message. The sender must be a party of the conversation.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        if !self.is_party(message.conversation_id, message.sender_id)? {
            return Err(StoreError::PermissionDenied(format!(
                "{} is not a party of {}",
                message.sender_id, message.conversation_id
            )));
        }

        let attachment = message.attachment.as_ref();
        self.conn().execute(
            "INSERT INTO messages (id, conversation_id, sender_id, content, created_at, read_at,
                                   reply_to, edited_at, liked_by, attachment_url, attachment_mime,
                                   attachment_name, attachment_size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender_id.to_string(),
                message.content,
                ts(&message.created_at),
                message.read_at.as_ref().map(ts),
                message.reply_to.map(|r| r.to_string()),
                message.edited_at.as_ref().map(ts),
                serde_json::to_string(&message.liked_by)?,
                attachment.map(|a| a.url.clone()),
                attachment.map(|a| a.mime_type.clone()),
                attachment.map(|a| a.file_name.clone()),
                attachment.map(|a| a.size as i64),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// All messages of a conversation, oldest first, ties broken by id.
    pub fn list_messages(&self, conversation: ConversationId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at ASC, id ASC"
        ))?;

        let rows = stmt.query_map(params![conversation.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn latest_message(&self, conversation: ConversationId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1"
                ),
                params![conversation.to_string()],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Replace the content of a message. Sender only.
    pub fn update_message_content(
        &self,
        id: MessageId,
        content: &str,
        edited_at: DateTime<Utc>,
        acting: UserId,
    ) -> Result<Message> {
        let existing = self.get_message(id)?.ok_or(StoreError::NotFound)?;
        if existing.sender_id != acting {
            return Err(StoreError::PermissionDenied(format!(
                "{acting} did not send message {id}"
            )));
        }

        self.conn().execute(
            "UPDATE messages SET content = ?2, edited_at = ?3 WHERE id = ?1",
            params![id.to_string(), content, ts(&edited_at)],
        )?;
        self.get_message(id)?.ok_or(StoreError::NotFound)
    }

    /// Add or remove `user` from the like-set of a message.
    pub fn toggle_message_like(&self, id: MessageId, user: UserId) -> Result<Message> {
        let tx = self.conn().unchecked_transaction()?;

        let mut message = self.get_message(id)?.ok_or(StoreError::NotFound)?;
        if !self.is_party(message.conversation_id, user)? {
            return Err(StoreError::PermissionDenied(format!(
                "{user} is not a party of {}",
                message.conversation_id
            )));
        }

        if !message.liked_by.remove(&user) {
            message.liked_by.insert(user);
        }
        tx.execute(
            "UPDATE messages SET liked_by = ?2 WHERE id = ?1",
            params![id.to_string(), serde_json::to_string(&message.liked_by)?],
        )?;
        tx.commit()?;

        Ok(message)
    }

    /// Delete a message. Sender only. Returns the deleted row.
    pub fn delete_message(&self, id: MessageId, acting: UserId) -> Result<Option<Message>> {
        let Some(existing) = self.get_message(id)? else {
            return Ok(None);
        };
        if existing.sender_id != acting {
            return Err(StoreError::PermissionDenied(format!(
                "{acting} did not send message {id}"
            )));
        }

        self.conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        Ok(Some(existing))
    }

    /// Stamp `read_at` on every message in `conversation` that `reader` did
    /// not send and has not read yet. Returns the rows that changed; calling
    /// it again changes nothing.
    pub fn mark_messages_as_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        if !self.is_party(conversation, reader)? {
            return Err(StoreError::PermissionDenied(format!(
                "{reader} is not a party of {conversation}"
            )));
        }

        let tx = self.conn().unchecked_transaction()?;

        let ids = self.unread_message_ids(conversation, reader)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        tx.execute(
            "UPDATE messages SET read_at = ?3
             WHERE conversation_id = ?1 AND sender_id <> ?2 AND read_at IS NULL",
            params![conversation.to_string(), reader.to_string(), ts(&at)],
        )?;

        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = self.get_message(id)? {
                updated.push(message);
            }
        }
        tx.commit()?;

        Ok(updated)
    }

    pub fn unread_message_ids(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM messages
             WHERE conversation_id = ?1 AND sender_id <> ?2 AND read_at IS NULL
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt.query_map(
            params![conversation.to_string(), reader.to_string()],
            |row| {
                let id: String = row.get(0)?;
                parse_id::<MessageId>(0, &id)
            },
        )?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let created_str: String = row.get(4)?;
    let liked_json: String = row.get(8)?;

    let liked_by: BTreeSet<UserId> =
        serde_json::from_str(&liked_json).map_err(|e| conversion_err(8, e))?;

    let attachment_url: Option<String> = row.get(9)?;
    let attachment = match attachment_url {
        Some(url) => Some(Attachment {
            url,
            mime_type: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
            file_name: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            size: row.get::<_, Option<i64>>(12)?.unwrap_or(0).max(0) as u64,
        }),
        None => None,
    };

    Ok(Message {
        id: parse_id(0, &id_str)?,
        conversation_id: parse_id(1, &conversation_str)?,
        sender_id: parse_id(2, &sender_str)?,
        content: row.get(3)?,
        created_at: parse_ts(4, &created_str)?,
        read_at: parse_opt_ts(5, row.get(5)?)?,
        reply_to: parse_opt_id(6, row.get(6)?)?,
        edited_at: parse_opt_ts(7, row.get(7)?)?,
        liked_by,
        attachment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::seeded;
    use murmur_shared::ConversationRow;
    use uuid::Uuid;

    fn message(conversation: ConversationId, sender: UserId, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::new(),
            conversation_id: conversation,
            sender_id: sender,
            content: "hello".into(),
            created_at: at,
            read_at: None,
            reply_to: None,
            edited_at: None,
            liked_by: BTreeSet::new(),
            attachment: None,
        }
    }

    fn direct(db: &Database, a: UserId, b: UserId) -> ConversationId {
        let row = ConversationRow::direct(a, b, Utc::now());
        db.insert_conversation(&row).unwrap();
        row.id
    }

    #[test]
    fn equal_timestamps_are_ordered_by_id() {
        let (db, users) = seeded(&["alice", "bob"]);
        let conv = direct(&db, users[0].id, users[1].id);
        let at = Utc::now();

        let mut second = message(conv, users[0].id, at);
        second.id = MessageId(Uuid::from_u128(2));
        let mut first = message(conv, users[1].id, at);
        first.id = MessageId(Uuid::from_u128(1));
        db.insert_message(&second).unwrap();
        db.insert_message(&first).unwrap();

        for _ in 0..3 {
            let ids: Vec<_> = db.list_messages(conv).unwrap().iter().map(|m| m.id).collect();
            assert_eq!(ids, vec![first.id, second.id]);
        }
        assert_eq!(db.latest_message(conv).unwrap().unwrap().id, second.id);
    }

    #[test]
    fn outsiders_cannot_post() {
        let (db, users) = seeded(&["alice", "bob", "mallory"]);
        let conv = direct(&db, users[0].id, users[1].id);
        let err = db
            .insert_message(&message(conv, users[2].id, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
    }

    #[test]
    fn attachment_and_likes_round_trip() {
        let (db, users) = seeded(&["alice", "bob"]);
        let conv = direct(&db, users[0].id, users[1].id);
        let mut m = message(conv, users[0].id, Utc::now());
        m.attachment = Some(Attachment {
            url: "https://blobs.example.org/a.png".into(),
            mime_type: "image/png".into(),
            file_name: "a.png".into(),
            size: 42,
        });
        db.insert_message(&m).unwrap();

        let liked = db.toggle_message_like(m.id, users[1].id).unwrap();
        assert!(liked.liked_by.contains(&users[1].id));
        let unliked = db.toggle_message_like(m.id, users[1].id).unwrap();
        assert!(unliked.liked_by.is_empty());

        let stored = db.get_message(m.id).unwrap().unwrap();
        assert_eq!(stored.attachment, m.attachment);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let (db, users) = seeded(&["alice", "bob"]);
        let (a, b) = (users[0].id, users[1].id);
        let conv = direct(&db, a, b);
        db.insert_message(&message(conv, a, Utc::now())).unwrap();
        db.insert_message(&message(conv, a, Utc::now())).unwrap();
        db.insert_message(&message(conv, b, Utc::now())).unwrap();

        assert_eq!(db.unread_message_ids(conv, b).unwrap().len(), 2);
        assert_eq!(db.mark_messages_as_read(conv, b, Utc::now()).unwrap().len(), 2);
        assert!(db.mark_messages_as_read(conv, b, Utc::now()).unwrap().is_empty());
        assert!(db.unread_message_ids(conv, b).unwrap().is_empty());
        // bob's own message is still unread for alice
        assert_eq!(db.unread_message_ids(conv, a).unwrap().len(), 1);
    }

    #[test]
    fn outsiders_cannot_mark_read() {
        let (db, users) = seeded(&["alice", "bob", "mallory"]);
        let (a, b, m) = (users[0].id, users[1].id, users[2].id);
        let conv = direct(&db, a, b);
        db.insert_message(&message(conv, b, Utc::now())).unwrap();

        assert!(matches!(
            db.mark_messages_as_read(conv, m, Utc::now()),
            Err(StoreError::PermissionDenied(_))
        ));
        assert_eq!(db.unread_message_ids(conv, a).unwrap().len(), 1);
    }

    #[test]
    fn edit_and_delete_are_sender_only() {
        let (db, users) = seeded(&["alice", "bob"]);
        let (a, b) = (users[0].id, users[1].id);
        let conv = direct(&db, a, b);
        let m = message(conv, a, Utc::now());
        db.insert_message(&m).unwrap();

        assert!(db.update_message_content(m.id, "x", Utc::now(), b).is_err());
        let edited = db.update_message_content(m.id, "edited", Utc::now(), a).unwrap();
        assert_eq!(edited.content, "edited");
        assert!(edited.edited_at.is_some());

        assert!(db.delete_message(m.id, b).is_err());
        assert!(db.delete_message(m.id, a).unwrap().is_some());
        assert!(db.get_message(m.id).unwrap().is_none());
    }
}
