//! Blocks, transactions and ciphertext payloads.
//!
//! Block creation is split into connection-level steps so the caller can
//! read the chain tip and append the next block inside one
//! [`Database::write_transaction`].

use rusqlite::{params, Connection, OptionalExtension};

use blockpost_shared::hashing::ledger_now;
use blockpost_shared::{BlockHeader, BlockId, ChatId, TransactionId, UserId};

use crate::database::{collect_rows, format_timestamp, parse_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::{Block, LedgerEntry, LedgerTransaction};

const BLOCK_COLUMNS: &str =
    "block_id, previous_hash, block_hash, timestamp, nonce, creator_user_id";

const ENTRY_SELECT: &str = "
    SELECT t.transaction_id, t.block_id, t.sender_id, t.receiver_id, t.chat_id,
           t.payload_hash, t.signature, t.timestamp,
           p.ciphertext, u.username
    FROM transactions t
    JOIN payloads p ON p.transaction_id = t.transaction_id
    LEFT JOIN users u ON u.user_id = t.sender_id";

/// One recipient copy to append under a block.
#[derive(Debug, Clone)]
pub struct NewTransaction<'a> {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub chat_id: Option<ChatId>,
    pub ciphertext: &'a str,
    pub payload_hash: &'a str,
    pub signature: &'a str,
}

impl Database {
    pub fn get_block(&self, id: BlockId) -> Result<Block> {
        self.conn()
            .query_row(
                &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE block_id = ?1"),
                params![id.0],
                row_to_block,
            )
            .map_err(StoreError::from_lookup)
    }

    /// Every block in insertion order.
    pub fn list_blocks(&self) -> Result<Vec<Block>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks ORDER BY block_id ASC"
        ))?;
        let rows = stmt.query_map([], row_to_block)?;
        collect_rows(rows)
    }

    pub fn block_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Every transaction recorded for `chat`, ordered by (timestamp, id).
    pub fn chat_transactions(&self, chat: ChatId) -> Result<Vec<LedgerTransaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT transaction_id, block_id, sender_id, receiver_id, chat_id,
                    payload_hash, signature, timestamp
             FROM transactions
             WHERE chat_id = ?1
             ORDER BY timestamp ASC, transaction_id ASC",
        )?;
        let rows = stmt.query_map(params![chat.0], row_to_transaction)?;
        collect_rows(rows)
    }

    /// Chat entries where `party` is the sender or the receiver, ordered by
    /// (timestamp, id).
    pub fn chat_entries_for_party(&self, chat: ChatId, party: UserId) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn().prepare(&format!(
            "{ENTRY_SELECT}
             WHERE t.chat_id = ?1 AND (t.sender_id = ?2 OR t.receiver_id = ?2)
             ORDER BY t.timestamp ASC, t.transaction_id ASC"
        ))?;
        let rows = stmt.query_map(params![chat.0, party.0], row_to_entry)?;
        collect_rows(rows)
    }

    /// Direct (chat-less) messages addressed to `receiver`, oldest first.
    pub fn inbox_entries(&self, receiver: UserId) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn().prepare(&format!(
            "{ENTRY_SELECT}
             WHERE t.chat_id IS NULL AND t.receiver_id = ?1
             ORDER BY t.timestamp ASC, t.transaction_id ASC"
        ))?;
        let rows = stmt.query_map(params![receiver.0], row_to_entry)?;
        collect_rows(rows)
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// Most recently inserted block, if any.
pub fn last_block(conn: &Connection) -> Result<Option<Block>> {
    Ok(conn
        .query_row(
            &format!("SELECT {BLOCK_COLUMNS} FROM blocks ORDER BY block_id DESC LIMIT 1"),
            [],
            row_to_block,
        )
        .optional()?)
}

/// Persist a block header under its computed hash.
///
/// A hash that already exists is a [`StoreError::Conflict`].
pub fn insert_block(conn: &Connection, header: &BlockHeader, block_hash: &str) -> Result<BlockId> {
    conn.execute(
        "INSERT INTO blocks (previous_hash, block_hash, timestamp, nonce, creator_user_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            header.previous_hash,
            block_hash,
            format_timestamp(&header.timestamp),
            header.nonce,
            header.creator_user_id.0,
        ],
    )
    .map_err(|e| StoreError::from_write(e, "block hash already recorded"))?;
    Ok(BlockId(conn.last_insert_rowid()))
}

/// Append one transaction and its payload under `block`.
pub fn insert_transaction(
    conn: &Connection,
    block: BlockId,
    tx: &NewTransaction<'_>,
) -> Result<TransactionId> {
    conn.execute(
        "INSERT INTO transactions
             (block_id, sender_id, receiver_id, chat_id, payload_hash, signature, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            block.0,
            tx.sender_id.0,
            tx.receiver_id.0,
            tx.chat_id.map(|c| c.0),
            tx.payload_hash,
            tx.signature,
            format_timestamp(&ledger_now()),
        ],
    )?;
    let id = TransactionId(conn.last_insert_rowid());

    conn.execute(
        "INSERT INTO payloads (transaction_id, ciphertext) VALUES (?1, ?2)",
        params![id.0, tx.ciphertext],
    )?;

    Ok(id)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<Block> {
    let ts: String = row.get(3)?;
    Ok(Block {
        id: BlockId(row.get(0)?),
        previous_hash: row.get(1)?,
        block_hash: row.get(2)?,
        timestamp: parse_timestamp(3, &ts)?,
        nonce: row.get(4)?,
        creator_user_id: UserId(row.get(5)?),
    })
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerTransaction> {
    let ts: String = row.get(7)?;
    let chat: Option<i64> = row.get(4)?;
    Ok(LedgerTransaction {
        id: TransactionId(row.get(0)?),
        block_id: BlockId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        receiver_id: UserId(row.get(3)?),
        chat_id: chat.map(ChatId),
        payload_hash: row.get(5)?,
        signature: row.get(6)?,
        timestamp: parse_timestamp(7, &ts)?,
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        transaction: row_to_transaction(row)?,
        ciphertext: row.get(8)?,
        sender_username: row.get(9)?,
    })
}
