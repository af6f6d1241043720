use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS chat_requests (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    requester_id TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    status       TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'denied')),
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    denied_at    TEXT,                        -- set on transition to denied only

    FOREIGN KEY (requester_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (recipient_id) REFERENCES users(id) ON DELETE CASCADE,
    CHECK (requester_id <> recipient_id)
);

-- at most one pending request per direction
CREATE UNIQUE INDEX IF NOT EXISTS idx_chat_requests_pending
    ON chat_requests(requester_id, recipient_id) WHERE status = 'pending';

CREATE INDEX IF NOT EXISTS idx_chat_requests_recipient ON chat_requests(recipient_id, status);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
