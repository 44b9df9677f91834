//! Domain model structs persisted in the server database.
//!
//! Every struct derives `Serialize` so the API layer can hand rows back
//! without an extra mapping step; secrets (`password_hash`) are skipped.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use blockpost_shared::{BlockId, ChatId, ChatKind, TransactionId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    /// Argon2id PHC string. Never serialized.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A conversation. `name` is `None` for private chats, whose display name
/// depends on who is looking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub name: Option<String>,
    pub creator_user_id: UserId,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One (chat, user) membership row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMember {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub display_name: Option<String>,
}

/// Per-chat role of a member. Members without a role row are plain
/// members.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Owner,
    Admin,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
        }
    }

    /// Owners and admins manage membership.
    pub fn can_manage_members(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown chat role: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// A persisted block header plus its hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub previous_hash: String,
    pub block_hash: String,
    pub timestamp: DateTime<Utc>,
    pub nonce: i64,
    pub creator_user_id: UserId,
}

/// One recipient's copy-record of a message event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub block_id: BlockId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub chat_id: Option<ChatId>,
    pub payload_hash: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

/// A transaction joined with its payload and the sender's username.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub transaction: LedgerTransaction,
    pub ciphertext: String,
    /// `None` when the sender id has no user row.
    pub sender_username: Option<String>,
}

// ---------------------------------------------------------------------------
// Refresh token
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: i64,
    pub user_id: UserId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
}

impl RefreshToken {
    /// Usable: not revoked and not past expiry.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && now < self.expires_at
    }
}
