//! Group roster: [`Participant`] rows and the admin checks every roster
//! write goes through.

use murmur_shared::{ConversationId, Participant, Role, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::sql::{conversion_err, parse_id, parse_ts, ts};

impl Database {
    /// Role of `user` in `conversation`, `None` when not a participant.
    pub fn role_of(&self, conversation: ConversationId, user: UserId) -> Result<Option<Role>> {
        let role: Option<String> = self
            .conn()
            .query_row(
                "SELECT role FROM conversation_participants
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation.to_string(), user.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(role.map(|r| r.parse::<Role>()).transpose()?)
    }

    pub(crate) fn require_admin(&self, conversation: ConversationId, acting: UserId) -> Result<()> {
        match self.role_of(conversation, acting)? {
            Some(Role::Admin) => Ok(()),
            _ => Err(StoreError::PermissionDenied(format!(
                "{acting} is not an admin of {conversation}"
            ))),
        }
    }

    /// Whether any participant of `conversation` holds the admin role.
    pub(crate) fn has_admin(&self, conversation: ConversationId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM conversation_participants
             WHERE conversation_id = ?1 AND role = ?2",
            params![conversation.to_string(), Role::Admin.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether `user` may read and write messages in `conversation`.
    pub fn is_party(&self, conversation: ConversationId, user: UserId) -> Result<bool> {
        let Some(row) = self.get_conversation(conversation)? else {
            return Ok(false);
        };
        if row.is_group {
            Ok(self.role_of(conversation, user)?.is_some())
        } else {
            Ok(row.is_direct_party(user))
        }
    }

    /// Add a participant on behalf of `acting`.
    ///
    /// `acting` must currently be an admin of the group. The one exception is
    /// the bootstrap insert: the creator adding themselves as admin while the
    /// roster is still empty.
    pub fn insert_participant(&self, participant: &Participant, acting: UserId) -> Result<()> {
        let conversation = self
            .get_conversation(participant.conversation_id)?
            .ok_or(StoreError::NotFound)?;
        if !conversation.is_group {
            return Err(StoreError::PermissionDenied(
                "direct conversations have no roster".into(),
            ));
        }

        let bootstrap = conversation.created_by == Some(acting)
            && participant.user_id == acting
            && participant.role == Role::Admin
            && self.list_participants(conversation.id)?.is_empty();
        if !bootstrap {
            self.require_admin(conversation.id, acting)?;
        }

        self.conn().execute(
            "INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                participant.conversation_id.to_string(),
                participant.user_id.to_string(),
                participant.role.as_str(),
                ts(&participant.joined_at),
            ],
        )?;
        Ok(())
    }

    /// Roster ordered by join time.
    pub fn list_participants(&self, conversation: ConversationId) -> Result<Vec<Participant>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, user_id, role, joined_at
             FROM conversation_participants
             WHERE conversation_id = ?1
             ORDER BY joined_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![conversation.to_string()], row_to_participant)?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }
        Ok(participants)
    }

    pub fn get_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<Option<Participant>> {
        let participant = self
            .conn()
            .query_row(
                "SELECT conversation_id, user_id, role, joined_at
                 FROM conversation_participants
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation.to_string(), user.to_string()],
                row_to_participant,
            )
            .optional()?;
        Ok(participant)
    }

    /// Change a participant's role. Admin only.
    pub fn update_role(
        &self,
        conversation: ConversationId,
        user: UserId,
        role: Role,
        acting: UserId,
    ) -> Result<Participant> {
        self.require_admin(conversation, acting)?;

        let affected = self.conn().execute(
            "UPDATE conversation_participants SET role = ?3
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation.to_string(), user.to_string(), role.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        self.get_participant(conversation, user)?
            .ok_or(StoreError::NotFound)
    }

    /// Remove a participant. Admins may remove anyone; everyone may remove
    /// themselves. Returns the removed row.
    pub fn delete_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
        acting: UserId,
    ) -> Result<Option<Participant>> {
        if acting != user {
            self.require_admin(conversation, acting)?;
        }

        let Some(existing) = self.get_participant(conversation, user)? else {
            return Ok(None);
        };

        self.conn().execute(
            "DELETE FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation.to_string(), user.to_string()],
        )?;
        Ok(Some(existing))
    }
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    let conversation_str: String = row.get(0)?;
    let user_str: String = row.get(1)?;
    let role_str: String = row.get(2)?;
    let joined_str: String = row.get(3)?;

    Ok(Participant {
        conversation_id: parse_id(0, &conversation_str)?,
        user_id: parse_id(1, &user_str)?,
        role: role_str.parse().map_err(|e| conversion_err(2, e))?,
        joined_at: parse_ts(3, &joined_str)?,
    })
}
