//! Conversation history reconstruction.
//!
//! A send leaves one transaction per recipient under a single block. A
//! reader gets one message per block: the copy addressed to them when it
//! exists, otherwise the first copy written, and only if the reader took
//! part in that copy (as sender or receiver).

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use blockpost_shared::constants::UNDECRYPTABLE_PLACEHOLDER;
use blockpost_shared::crypto::decrypt_to_string;
use blockpost_shared::{BlockId, ChatId, Identity, TransactionId, UserId};
use blockpost_store::{Database, LedgerEntry, LedgerTransaction};

use crate::error::ServerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryMessage {
    pub message_id: TransactionId,
    pub from_user_id: UserId,
    pub from_username: Option<String>,
    pub ciphertext: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

impl From<LedgerEntry> for HistoryMessage {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            message_id: entry.transaction.id,
            from_user_id: entry.transaction.sender_id,
            from_username: entry.sender_username,
            ciphertext: entry.ciphertext,
            signature: entry.transaction.signature,
            timestamp: entry.transaction.timestamp,
        }
    }
}

/// Pick the transaction each block contributes to `reader`'s view.
fn preferred_copies(all: &[LedgerTransaction], reader: UserId) -> HashSet<TransactionId> {
    let mut by_block: BTreeMap<BlockId, &LedgerTransaction> = BTreeMap::new();

    for tx in all {
        by_block
            .entry(tx.block_id)
            .and_modify(|current| {
                let current_is_readers = current.receiver_id == reader;
                let tx_is_readers = tx.receiver_id == reader;
                if (tx_is_readers && !current_is_readers)
                    || (tx_is_readers == current_is_readers && tx.id < current.id)
                {
                    *current = tx;
                }
            })
            .or_insert(tx);
    }

    by_block.into_values().map(|tx| tx.id).collect()
}

/// Reduce `candidates` (the reader's own copies, in display order) to one
/// message per block.
pub fn reconstruct(
    all: &[LedgerTransaction],
    candidates: Vec<LedgerEntry>,
    reader: UserId,
) -> Vec<HistoryMessage> {
    let preferred = preferred_copies(all, reader);
    candidates
        .into_iter()
        .filter(|entry| preferred.contains(&entry.transaction.id))
        .map(HistoryMessage::from)
        .collect()
}

/// The chat as `reader` sees it, oldest first. Only current members may
/// read; past members are refused like strangers.
pub fn get_messages(
    db: &Database,
    chat: ChatId,
    reader: UserId,
) -> Result<Vec<HistoryMessage>, ServerError> {
    db.get_chat(chat)?;
    if !db.is_member(chat, reader)? {
        return Err(ServerError::Forbidden("not a member of this chat".into()));
    }

    let all = db.chat_transactions(chat)?;
    let candidates = db.chat_entries_for_party(chat, reader)?;
    Ok(reconstruct(&all, candidates, reader))
}

/// Direct messages received by `user`, oldest first.
pub fn inbox(db: &Database, user: UserId) -> Result<Vec<HistoryMessage>, ServerError> {
    Ok(db
        .inbox_entries(user)?
        .into_iter()
        .map(HistoryMessage::from)
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct DecryptedMessage {
    #[serde(flatten)]
    pub message: HistoryMessage,
    pub plaintext: String,
}

/// Open each message with the reader's private key. Failures render as a
/// placeholder instead of failing the whole history.
pub fn decrypt_history(
    messages: Vec<HistoryMessage>,
    private_key_pem: &str,
) -> Result<Vec<DecryptedMessage>, ServerError> {
    Identity::from_private_pem(private_key_pem)
        .map_err(|e| ServerError::Validation(e.to_string()))?;

    Ok(messages
        .into_iter()
        .map(|message| {
            let plaintext = decrypt_to_string(&message.ciphertext, private_key_pem)
                .unwrap_or_else(|| UNDECRYPTABLE_PLACEHOLDER.to_string());
            DecryptedMessage { message, plaintext }
        })
        .collect())
}
