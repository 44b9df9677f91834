//! Block builder and chain verification.
//!
//! Blocks are only appended inside a storage write transaction, so reading
//! the chain tip and inserting the next block cannot interleave with
//! another send.

use rand::Rng;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, warn};

use blockpost_shared::constants::{GENESIS_PREVIOUS_HASH, NONCE_MAX, NONCE_MIN};
use blockpost_shared::{BlockHeader, BlockId, UserId};
use blockpost_store::{ledger, Database, StoreError};

/// Fresh nonce for a block. Purely an audit field.
pub fn random_nonce() -> i64 {
    rand::thread_rng().gen_range(NONCE_MIN..=NONCE_MAX)
}

/// Persist a block following `previous_hash` (the genesis link when
/// `None`) and return its id and hash.
pub fn create_block(
    conn: &Connection,
    previous_hash: Option<&str>,
    nonce: i64,
    creator: UserId,
) -> Result<(BlockId, String), StoreError> {
    let header = BlockHeader::new(previous_hash, nonce, creator);
    let block_hash = header.compute_hash();
    let block_id = ledger::insert_block(conn, &header, &block_hash)?;

    debug!(
        block_id = %block_id,
        hash = %block_hash,
        genesis = header.is_genesis_link(),
        "Block appended"
    );
    Ok((block_id, block_hash))
}

/// Read the chain tip and append the next block on top of it.
///
/// `conn` must be inside a write transaction.
pub fn append_block(conn: &Connection, creator: UserId) -> Result<(BlockId, String), StoreError> {
    let tip = ledger::last_block(conn)?;
    create_block(
        conn,
        tip.as_ref().map(|b| b.block_hash.as_str()),
        random_nonce(),
        creator,
    )
}

/// Outcome of walking the whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub blocks: usize,
    pub valid: bool,
    pub first_invalid_block: Option<BlockId>,
}

/// Check the genesis link, every `previous_hash` link and every stored
/// hash against a recomputation.
pub fn verify_chain(db: &Database) -> Result<ChainReport, StoreError> {
    let blocks = db.list_blocks()?;
    let mut expected_previous = GENESIS_PREVIOUS_HASH.to_string();

    for block in &blocks {
        let header = BlockHeader {
            previous_hash: block.previous_hash.clone(),
            timestamp: block.timestamp,
            nonce: block.nonce,
            creator_user_id: block.creator_user_id,
        };

        if block.previous_hash != expected_previous || header.compute_hash() != block.block_hash {
            warn!(block_id = %block.id, "Chain verification failed");
            return Ok(ChainReport {
                blocks: blocks.len(),
                valid: false,
                first_invalid_block: Some(block.id),
            });
        }
        expected_previous = block.block_hash.clone();
    }

    Ok(ChainReport {
        blocks: blocks.len(),
        valid: true,
        first_invalid_block: None,
    })
}
