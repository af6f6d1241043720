//! CRUD operations for [`ConversationRow`] records.

use murmur_shared::types::normalize_pair;
use murmur_shared::{ConversationId, ConversationRow, GroupUpdate, Role, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::sql::{parse_id, parse_opt_id, parse_ts, ts};

const CONVERSATION_COLUMNS: &str =
    "c.id, c.created_at, c.is_group, c.user_a, c.user_b, c.name, c.icon_url, c.created_by";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new conversation.
    ///
    /// A second direct conversation for the same pair fails with
    /// [`StoreError::UniqueViolation`].
    pub fn insert_conversation(&self, row: &ConversationRow) -> Result<()> {
        let (user_a, user_b) = match (row.user_a, row.user_b) {
            (Some(a), Some(b)) => {
                let (a, b) = normalize_pair(a, b);
                (Some(a), Some(b))
            }
            other => other,
        };

        self.conn().execute(
            "INSERT INTO conversations (id, created_at, is_group, user_a, user_b, name, icon_url, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.id.to_string(),
                ts(&row.created_at),
                row.is_group as i32,
                user_a.map(|u| u.to_string()),
                user_b.map(|u| u.to_string()),
                row.name,
                row.icon_url,
                row.created_by.map(|u| u.to_string()),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_conversation(&self, id: ConversationId) -> Result<Option<ConversationRow>> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?1"),
                params![id.to_string()],
                row_to_conversation,
            )
            .optional()?;
        Ok(row)
    }

    /// The direct conversation between `a` and `b`, in either order.
    pub fn find_direct_conversation(&self, a: UserId, b: UserId) -> Result<Option<ConversationRow>> {
        let (a, b) = normalize_pair(a, b);
        let row = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations c
                     WHERE c.is_group = 0 AND c.user_a = ?1 AND c.user_b = ?2"
                ),
                params![a.to_string(), b.to_string()],
                row_to_conversation,
            )
            .optional()?;
        Ok(row)
    }

    /// Direct conversations where `user` is a party.
    pub fn list_direct_conversations(&self, user: UserId) -> Result<Vec<ConversationRow>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c
             WHERE c.is_group = 0 AND (c.user_a = ?1 OR c.user_b = ?1)
             ORDER BY c.created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    /// Groups reached through the participant table.
    pub fn list_group_conversations(&self, user: UserId) -> Result<Vec<ConversationRow>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE c.is_group = 1 AND p.user_id = ?1
             ORDER BY c.created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Rename a group or change its icon. Admin only.
    pub fn update_group(
        &self,
        id: ConversationId,
        update: &GroupUpdate,
        acting: UserId,
    ) -> Result<ConversationRow> {
        self.require_admin(id, acting)?;

        self.conn().execute(
            "UPDATE conversations SET
                name = COALESCE(?2, name),
                icon_url = COALESCE(?3, icon_url)
             WHERE id = ?1 AND is_group = 1",
            params![id.to_string(), update.name, update.icon_url],
        )?;

        self.get_conversation(id)?.ok_or(StoreError::NotFound)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a conversation; participants and messages cascade.
    ///
    /// Allowed for a party of a direct conversation or a group admin. The
    /// creator may also delete a group whose roster has no admin yet, which
    /// is how a failed creation is rolled back. Returns the deleted row.
    pub fn delete_conversation(
        &self,
        id: ConversationId,
        acting: UserId,
    ) -> Result<Option<ConversationRow>> {
        let Some(row) = self.get_conversation(id)? else {
            return Ok(None);
        };

        let allowed = if row.is_group {
            self.role_of(id, acting)? == Some(Role::Admin)
                || (row.created_by == Some(acting) && !self.has_admin(id)?)
        } else {
            row.is_direct_party(acting)
        };
        if !allowed {
            return Err(StoreError::PermissionDenied(format!(
                "{acting} may not delete conversation {id}"
            )));
        }

        self.conn()
            .execute("DELETE FROM conversations WHERE id = ?1", params![id.to_string()])?;
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    let id_str: String = row.get(0)?;
    let created_str: String = row.get(1)?;
    let is_group: i32 = row.get(2)?;

    Ok(ConversationRow {
        id: parse_id(0, &id_str)?,
        created_at: parse_ts(1, &created_str)?,
        is_group: is_group != 0,
        user_a: parse_opt_id(3, row.get(3)?)?,
        user_b: parse_opt_id(4, row.get(4)?)?,
        name: row.get(5)?,
        icon_url: row.get(6)?,
        created_by: parse_opt_id(7, row.get(7)?)?,
    })
}
