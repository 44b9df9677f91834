//! v002 -- Message ledger.
//!
//! Ledger rows reference users without foreign keys: history outlives the
//! memberships that produced it. Blocks, transactions and payloads are
//! append-only.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    block_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    previous_hash   TEXT NOT NULL CHECK (length(previous_hash) = 64),
    block_hash      TEXT NOT NULL UNIQUE CHECK (length(block_hash) = 64),
    timestamp       TEXT NOT NULL,
    nonce           INTEGER NOT NULL,
    creator_user_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    transaction_id INTEGER PRIMARY KEY AUTOINCREMENT,
    block_id       INTEGER NOT NULL,
    sender_id      INTEGER NOT NULL,
    receiver_id    INTEGER NOT NULL,
    chat_id        INTEGER,                   -- NULL for direct messages
    payload_hash   TEXT NOT NULL CHECK (length(payload_hash) = 64),
    signature      TEXT NOT NULL,
    timestamp      TEXT NOT NULL,

    FOREIGN KEY (block_id) REFERENCES blocks(block_id),
    FOREIGN KEY (chat_id) REFERENCES chats(chat_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_transactions_chat_ts
    ON transactions(chat_id, timestamp, transaction_id);
CREATE INDEX IF NOT EXISTS idx_transactions_receiver
    ON transactions(receiver_id, timestamp);

CREATE TABLE IF NOT EXISTS payloads (
    payload_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_id INTEGER NOT NULL UNIQUE,
    ciphertext     TEXT NOT NULL,             -- opaque, base64 from the client

    FOREIGN KEY (transaction_id) REFERENCES transactions(transaction_id) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
