//! v001 -- Initial schema creation.
//!
//! Creates users, their published keys, chats, chat membership and
//! per-chat roles.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    user_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,               -- Argon2id PHC string
    created_at    TEXT NOT NULL,               -- RFC-3339, microseconds
    last_seen     TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Published public keys (one per user)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_keys (
    user_id    INTEGER PRIMARY KEY NOT NULL,
    public_key TEXT NOT NULL,                  -- SPKI PEM (Ed25519)
    created_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    chat_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_type       TEXT NOT NULL CHECK (chat_type IN ('private', 'group', 'channel')),
    chat_name       TEXT,                      -- NULL for private chats
    creator_user_id INTEGER NOT NULL,
    description     TEXT,
    created_at      TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Chat membership
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_members (
    chat_id      INTEGER NOT NULL,
    user_id      INTEGER NOT NULL,
    joined_at    TEXT NOT NULL,
    display_name TEXT,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(chat_id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_members_user ON chat_members(user_id);

-- ----------------------------------------------------------------
-- Per-chat roles
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_user_roles (
    chat_id     INTEGER NOT NULL,
    user_id     INTEGER NOT NULL,
    role        TEXT NOT NULL CHECK (role IN ('owner', 'admin')),
    assigned_at TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id, user_id) REFERENCES chat_members(chat_id, user_id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
