//! CRUD operations for [`User`] profiles.

use murmur_shared::{ProfileUpdate, User, UserId};
use rusqlite::{params, params_from_iter, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::sql::{parse_id, placeholders};

const USER_COLUMNS: &str = "id, username, fullname, avatar_url, bio, email";

impl Database {
    /// Insert a profile, or overwrite the mutable fields of an existing one.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, fullname, avatar_url, bio, email)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                fullname = excluded.fullname,
                avatar_url = excluded.avatar_url,
                bio = excluded.bio,
                email = excluded.email",
            params![
                user.id.to_string(),
                user.username,
                user.fullname,
                user.avatar_url,
                user.bio,
                user.email,
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Batched lookup. Unknown ids are skipped; order is unspecified.
    pub fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id IN ({})",
            placeholders(1, ids.len())
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter().map(|id| id.to_string())), row_to_user)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    /// Apply the `Some` fields of `update` and return the new profile.
    pub fn update_profile(&self, id: UserId, update: &ProfileUpdate) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET
                username = COALESCE(?2, username),
                fullname = COALESCE(?3, fullname),
                avatar_url = COALESCE(?4, avatar_url),
                bio = COALESCE(?5, bio)
             WHERE id = ?1",
            params![
                id.to_string(),
                update.username,
                update.fullname,
                update.avatar_url,
                update.bio,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)?.ok_or(StoreError::NotFound)
    }

    /// Case-insensitive prefix match on username or full name.
    pub fn search_users(&self, prefix: &str, limit: u32) -> Result<Vec<User>> {
        let pattern = format!("{}%", prefix.replace('%', "").replace('_', ""));
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE username LIKE ?1 OR fullname LIKE ?1
             ORDER BY COALESCE(username, fullname) ASC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![pattern, limit], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    Ok(User {
        id: parse_id(0, &id_str)?,
        username: row.get(1)?,
        fullname: row.get(2)?,
        avatar_url: row.get(3)?,
        bio: row.get(4)?,
        email: row.get(5)?,
    })
}
