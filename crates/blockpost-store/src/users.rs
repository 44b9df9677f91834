//! CRUD operations for [`User`] records and their published public keys.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use blockpost_shared::UserId;

use crate::database::{format_timestamp, parse_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::User;

const USER_COLUMNS: &str = "user_id, username, email, password_hash, created_at, last_seen";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user. A taken email is a [`StoreError::Conflict`].
    pub fn create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<User> {
        let now = blockpost_shared::hashing::ledger_now();
        self.conn()
            .execute(
                "INSERT INTO users (username, email, password_hash, created_at, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![username, email, password_hash, format_timestamp(&now)],
            )
            .map_err(|e| StoreError::from_write(e, "email already registered"))?;

        Ok(User {
            id: UserId(self.conn().last_insert_rowid()),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
            last_seen: now,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![id.0],
                row_to_user,
            )
            .map_err(StoreError::from_lookup)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                row_to_user,
            )
            .optional()?)
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        user_exists(self.conn(), id)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn update_username(&self, id: UserId, username: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET username = ?1 WHERE user_id = ?2",
            params![username, id.0],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn touch_last_seen(&self, id: UserId) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET last_seen = ?1 WHERE user_id = ?2",
            params![format_timestamp(&Utc::now()), id.0],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Public keys
    // ------------------------------------------------------------------

    /// Publish (or replace) the user's public key PEM.
    pub fn set_public_key(&self, id: UserId, public_key_pem: &str) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO user_keys (user_id, public_key, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     public_key = excluded.public_key,
                     created_at = excluded.created_at",
                params![id.0, public_key_pem, format_timestamp(&Utc::now())],
            )
            .map_err(|e| StoreError::from_write(e, "unknown user"))?;
        Ok(())
    }

    pub fn get_public_key(&self, id: UserId) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT public_key FROM user_keys WHERE user_id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?)
    }
}

pub(crate) fn user_exists(conn: &Connection, id: UserId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE user_id = ?1",
            params![id.0],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let created: String = row.get(4)?;
    let seen: String = row.get(5)?;

    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: parse_timestamp(4, &created)?,
        last_seen: parse_timestamp(5, &seen)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("users.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn create_and_fetch_user() {
        let (_dir, db) = open();
        let user = db.create_user("alice", "alice@example.org", "$argon2id$x").unwrap();

        assert_eq!(db.get_user(user.id).unwrap(), user);
        assert_eq!(
            db.get_user_by_email("alice@example.org").unwrap().unwrap().id,
            user.id
        );
        assert!(db.get_user_by_email("nobody@example.org").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_conflicts() {
        let (_dir, db) = open();
        db.create_user("alice", "a@example.org", "h").unwrap();
        let err = db.create_user("alice2", "a@example.org", "h").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn missing_user_is_not_found() {
        let (_dir, db) = open();
        assert!(matches!(db.get_user(UserId(99)), Err(StoreError::NotFound)));
        assert!(matches!(
            db.update_username(UserId(99), "x"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn public_key_is_replaced() {
        let (_dir, db) = open();
        let user = db.create_user("bob", "bob@example.org", "h").unwrap();
        assert!(db.get_public_key(user.id).unwrap().is_none());

        db.set_public_key(user.id, "PEM-1").unwrap();
        db.set_public_key(user.id, "PEM-2").unwrap();
        assert_eq!(db.get_public_key(user.id).unwrap().as_deref(), Some("PEM-2"));
    }
}
