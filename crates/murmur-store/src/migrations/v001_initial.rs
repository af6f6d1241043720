//! v001 -- Initial schema creation.
//!
//! Creates `users`, `conversations`, `conversation_participants` and
//! `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID issued by the identity provider
    username   TEXT UNIQUE,
    fullname   TEXT NOT NULL DEFAULT '',
    avatar_url TEXT,
    bio        TEXT,
    email      TEXT
);

-- ----------------------------------------------------------------
-- Conversations (direct and group)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    created_at TEXT NOT NULL,                 -- RFC-3339, fixed width
    is_group   INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    user_a     TEXT,                          -- direct only, user_a < user_b
    user_b     TEXT,
    name       TEXT,                          -- group only
    icon_url   TEXT,
    created_by TEXT,

    FOREIGN KEY (user_a)     REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (user_b)     REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE SET NULL,

    CHECK (
        (is_group = 0 AND user_a IS NOT NULL AND user_b IS NOT NULL AND user_a < user_b)
        OR (is_group = 1 AND name IS NOT NULL)
    )
);

-- one direct conversation per unordered pair
CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_direct_pair
    ON conversations(user_a, user_b) WHERE is_group = 0;

CREATE INDEX IF NOT EXISTS idx_conversations_user_b ON conversations(user_b);

-- ----------------------------------------------------------------
-- Group participants
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    role            TEXT NOT NULL CHECK (role IN ('admin', 'member')),
    joined_at       TEXT NOT NULL,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)         REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON conversation_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL, -- UUID v4, generated by the sender
    conversation_id TEXT NOT NULL,
    sender_id       TEXT NOT NULL,
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    read_at         TEXT,
    reply_to        TEXT,
    edited_at       TEXT,
    liked_by        TEXT NOT NULL DEFAULT '[]', -- JSON array of user ids
    attachment_url  TEXT,
    attachment_mime TEXT,
    attachment_name TEXT,
    attachment_size INTEGER,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id)       REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (reply_to)        REFERENCES messages(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, created_at, id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
