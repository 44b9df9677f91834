//! Chats, membership and per-chat roles.
//!
//! The free functions take a plain [`Connection`] so they run unchanged
//! inside a write transaction (a `rusqlite::Transaction` derefs to one);
//! the [`Database`] methods are the same calls on the shared connection.

use rusqlite::{params, Connection, OptionalExtension};

use blockpost_shared::hashing::ledger_now;
use blockpost_shared::{ChatId, ChatKind, UserId};

use crate::database::{collect_rows, format_timestamp, parse_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::{Chat, ChatMember, ChatRole};

const CHAT_COLUMNS: &str =
    "c.chat_id, c.chat_type, c.chat_name, c.creator_user_id, c.description, c.created_at";

impl Database {
    /// Create a chat with its creator as `owner` and the other initial
    /// members, all in one transaction.
    ///
    /// Kind rules are the caller's job; this only persists.
    pub fn create_chat(
        &mut self,
        kind: ChatKind,
        name: Option<&str>,
        creator: UserId,
        description: Option<&str>,
        members: &[UserId],
    ) -> Result<Chat> {
        let tx = self.write_transaction()?;

        let chat = insert_chat(&tx, kind, name, creator, description)?;
        insert_member(&tx, chat.id, creator, None)?;
        assign_role(&tx, chat.id, creator, ChatRole::Owner)?;
        for member in members.iter().filter(|m| **m != creator) {
            insert_member(&tx, chat.id, *member, None)?;
        }

        tx.commit()?;

        tracing::debug!(chat_id = %chat.id, kind = %kind, "chat created");
        Ok(chat)
    }

    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        get_chat(self.conn(), id)
    }

    pub fn is_member(&self, chat: ChatId, user: UserId) -> Result<bool> {
        is_member(self.conn(), chat, user)
    }

    pub fn list_member_ids(&self, chat: ChatId) -> Result<Vec<UserId>> {
        list_member_ids(self.conn(), chat)
    }

    pub fn list_members(&self, chat: ChatId) -> Result<Vec<ChatMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT chat_id, user_id, joined_at, display_name
             FROM chat_members
             WHERE chat_id = ?1
             ORDER BY joined_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![chat.0], row_to_member)?;
        collect_rows(rows)
    }

    pub fn add_member(
        &self,
        chat: ChatId,
        user: UserId,
        display_name: Option<&str>,
    ) -> Result<ChatMember> {
        insert_member(self.conn(), chat, user, display_name)
    }

    /// Remove a membership (its role row cascades). Ledger rows are kept.
    /// Returns `true` if a row was deleted.
    pub fn remove_member(&self, chat: ChatId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat.0, user.0],
        )?;
        Ok(affected > 0)
    }

    pub fn assign_role(&self, chat: ChatId, user: UserId, role: ChatRole) -> Result<()> {
        assign_role(self.conn(), chat, user, role)
    }

    /// Drop a member back to no role. Returns `true` if a role was removed.
    pub fn clear_role(&self, chat: ChatId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_user_roles WHERE chat_id = ?1 AND user_id = ?2",
            params![chat.0, user.0],
        )?;
        Ok(affected > 0)
    }

    /// Make `to` the owner and demote `from` to admin, in one transaction.
    pub fn transfer_ownership(&mut self, chat: ChatId, from: UserId, to: UserId) -> Result<()> {
        let tx = self.write_transaction()?;
        assign_role(&tx, chat, to, ChatRole::Owner)?;
        assign_role(&tx, chat, from, ChatRole::Admin)?;
        tx.commit()?;

        tracing::debug!(chat_id = %chat, from = %from, to = %to, "ownership transferred");
        Ok(())
    }

    pub fn member_role(&self, chat: ChatId, user: UserId) -> Result<Option<ChatRole>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT role FROM chat_user_roles WHERE chat_id = ?1 AND user_id = ?2",
                params![chat.0, user.0],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|r| r.parse::<ChatRole>().map_err(StoreError::InvalidData))
            .transpose()
    }

    /// Chats the user currently belongs to, newest first.
    pub fn list_chats_for_user(&self, user: UserId) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHAT_COLUMNS}
             FROM chats c
             JOIN chat_members m ON m.chat_id = c.chat_id
             WHERE m.user_id = ?1
             ORDER BY c.created_at DESC, c.chat_id DESC"
        ))?;
        let rows = stmt.query_map(params![user.0], row_to_chat)?;
        collect_rows(rows)
    }

    /// Name of `chat` as `viewer` sees it.
    ///
    /// Private chats show the other member (their per-membership display
    /// name, else their username); other kinds show the chat name.
    pub fn chat_display_name(&self, chat: &Chat, viewer: UserId) -> Result<Option<String>> {
        if chat.kind != ChatKind::Private {
            return Ok(chat.name.clone());
        }
        Ok(self
            .conn()
            .query_row(
                "SELECT COALESCE(m.display_name, u.username)
                 FROM chat_members m
                 JOIN users u ON u.user_id = m.user_id
                 WHERE m.chat_id = ?1 AND m.user_id != ?2
                 LIMIT 1",
                params![chat.id.0, viewer.0],
                |row| row.get(0),
            )
            .optional()?)
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

pub fn insert_chat(
    conn: &Connection,
    kind: ChatKind,
    name: Option<&str>,
    creator: UserId,
    description: Option<&str>,
) -> Result<Chat> {
    let now = ledger_now();
    conn.execute(
        "INSERT INTO chats (chat_type, chat_name, creator_user_id, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![kind.as_str(), name, creator.0, description, format_timestamp(&now)],
    )?;

    Ok(Chat {
        id: ChatId(conn.last_insert_rowid()),
        kind,
        name: name.map(str::to_string),
        creator_user_id: creator,
        description: description.map(str::to_string),
        created_at: now,
    })
}

/// Insert a membership. An existing (chat, user) pair is a
/// [`StoreError::Conflict`].
pub fn insert_member(
    conn: &Connection,
    chat: ChatId,
    user: UserId,
    display_name: Option<&str>,
) -> Result<ChatMember> {
    let now = ledger_now();
    conn.execute(
        "INSERT INTO chat_members (chat_id, user_id, joined_at, display_name)
         VALUES (?1, ?2, ?3, ?4)",
        params![chat.0, user.0, format_timestamp(&now), display_name],
    )
    .map_err(|e| StoreError::from_write(e, "user is already a member of this chat"))?;

    Ok(ChatMember {
        chat_id: chat,
        user_id: user,
        joined_at: now,
        display_name: display_name.map(str::to_string),
    })
}

pub fn assign_role(conn: &Connection, chat: ChatId, user: UserId, role: ChatRole) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_user_roles (chat_id, user_id, role, assigned_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(chat_id, user_id) DO UPDATE SET
             role = excluded.role,
             assigned_at = excluded.assigned_at",
        params![chat.0, user.0, role.as_str(), format_timestamp(&ledger_now())],
    )
    .map_err(|e| StoreError::from_write(e, "role holder must be a chat member"))?;
    Ok(())
}

pub fn get_chat(conn: &Connection, id: ChatId) -> Result<Chat> {
    conn.query_row(
        &format!("SELECT {CHAT_COLUMNS} FROM chats c WHERE c.chat_id = ?1"),
        params![id.0],
        row_to_chat,
    )
    .map_err(StoreError::from_lookup)
}

pub fn is_member(conn: &Connection, chat: ChatId, user: UserId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat.0, user.0],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn list_member_ids(conn: &Connection, chat: ChatId) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM chat_members WHERE chat_id = ?1 ORDER BY user_id ASC",
    )?;
    let rows = stmt.query_map(params![chat.0], |row| Ok(UserId(row.get(0)?)))?;
    collect_rows(rows)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let kind_str: String = row.get(1)?;
    let created_str: String = row.get(5)?;

    let kind = kind_str.parse::<ChatKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(StoreError::InvalidData(e)),
        )
    })?;

    Ok(Chat {
        id: ChatId(row.get(0)?),
        kind,
        name: row.get(2)?,
        creator_user_id: UserId(row.get(3)?),
        description: row.get(4)?,
        created_at: parse_timestamp(5, &created_str)?,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMember> {
    let joined_str: String = row.get(2)?;
    Ok(ChatMember {
        chat_id: ChatId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        joined_at: parse_timestamp(2, &joined_str)?,
        display_name: row.get(3)?,
    })
}
