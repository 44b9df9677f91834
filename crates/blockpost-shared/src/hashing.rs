//! Canonical hashing for ledger rows.
//!
//! Every hash in the ledger is the lowercase hex SHA-256 of a key-sorted,
//! whitespace-free JSON object. Keys are sorted by building the object from
//! a `BTreeMap`, which keeps the output independent of serde_json's
//! `preserve_order` feature.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::constants::{GENESIS_PREVIOUS_HASH, HASH_HEX_LEN};
use crate::types::UserId;

/// Serialize a set of fields as canonical JSON bytes.
pub fn canonical_json(fields: &BTreeMap<&str, Value>) -> Vec<u8> {
    // A map of strings to JSON values always serializes.
    serde_json::to_vec(fields).unwrap_or_default()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stable textual form of a ledger timestamp: RFC 3339, microseconds, `Z`.
///
/// Also the storage format, so a stored timestamp re-hashes identically.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time truncated to the precision [`canonical_timestamp`] keeps.
pub fn ledger_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Integrity reference for a ciphertext blob: `H({"data": ciphertext})`.
pub fn payload_hash(ciphertext: &str) -> String {
    let mut fields = BTreeMap::new();
    fields.insert("data", Value::String(ciphertext.to_string()));
    sha256_hex(&canonical_json(&fields))
}

/// `true` if `s` looks like a hex SHA-256 digest.
pub fn is_hash_hex(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// The hashed fields of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub previous_hash: String,
    pub timestamp: DateTime<Utc>,
    pub nonce: i64,
    pub creator_user_id: UserId,
}

impl BlockHeader {
    /// Header for a block following `previous_hash`, or the genesis link
    /// when there is no chain tip yet.
    pub fn new(previous_hash: Option<&str>, nonce: i64, creator_user_id: UserId) -> Self {
        Self {
            previous_hash: previous_hash.unwrap_or(GENESIS_PREVIOUS_HASH).to_string(),
            timestamp: ledger_now(),
            nonce,
            creator_user_id,
        }
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut fields = BTreeMap::new();
        fields.insert("creator_user_id", Value::from(self.creator_user_id.0));
        fields.insert("nonce", Value::from(self.nonce));
        fields.insert("previous_hash", Value::String(self.previous_hash.clone()));
        fields.insert("timestamp", Value::String(canonical_timestamp(&self.timestamp)));
        canonical_json(&fields)
    }

    pub fn compute_hash(&self) -> String {
        sha256_hex(&self.canonical_bytes())
    }

    pub fn is_genesis_link(&self) -> bool {
        self.previous_hash == GENESIS_PREVIOUS_HASH
    }
}
