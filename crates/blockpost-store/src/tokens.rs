//! Refresh token persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use blockpost_shared::UserId;

use crate::database::{format_timestamp, parse_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::RefreshToken;

const TOKEN_COLUMNS: &str = "token_id, user_id, token, expires_at, is_revoked";

impl Database {
    pub fn insert_refresh_token(
        &self,
        user: UserId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken> {
        insert_token(self.conn(), user, token, expires_at)
    }

    pub fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        find_token(self.conn(), token)
    }

    /// Revoke `old` and store `new` for the same user, atomically.
    ///
    /// Returns `None` when `old` is unknown, revoked or expired at `now`;
    /// of two concurrent rotations of the same token exactly one succeeds.
    pub fn rotate_refresh_token(
        &mut self,
        old: &str,
        new: &str,
        now: DateTime<Utc>,
        new_expires_at: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>> {
        let tx = self.write_transaction()?;

        let Some(current) = find_token(&tx, old)? else {
            return Ok(None);
        };
        if !current.is_active(now) {
            return Ok(None);
        }

        let revoked = tx.execute(
            "UPDATE refresh_tokens SET is_revoked = 1 WHERE token_id = ?1 AND is_revoked = 0",
            params![current.id],
        )?;
        if revoked == 0 {
            return Ok(None);
        }

        let issued = insert_token(&tx, current.user_id, new, new_expires_at)?;
        tx.commit()?;
        Ok(Some(issued))
    }

    /// Revoke one token. Unknown or already revoked tokens are not an
    /// error; returns whether a live token was revoked.
    pub fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE refresh_tokens SET is_revoked = 1 WHERE token = ?1 AND is_revoked = 0",
            params![token],
        )?;
        Ok(affected > 0)
    }

    pub fn revoke_all_refresh_tokens(&self, user: UserId) -> Result<usize> {
        Ok(self.conn().execute(
            "UPDATE refresh_tokens SET is_revoked = 1 WHERE user_id = ?1 AND is_revoked = 0",
            params![user.0],
        )?)
    }

    /// Delete tokens that expired before `now` or were revoked.
    pub fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM refresh_tokens WHERE expires_at < ?1 OR is_revoked = 1",
            params![format_timestamp(&now)],
        )?)
    }
}

fn insert_token(
    conn: &Connection,
    user: UserId,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<RefreshToken> {
    conn.execute(
        "INSERT INTO refresh_tokens (user_id, token, expires_at, is_revoked)
         VALUES (?1, ?2, ?3, 0)",
        params![user.0, token, format_timestamp(&expires_at)],
    )
    .map_err(|e| StoreError::from_write(e, "refresh token already exists"))?;

    Ok(RefreshToken {
        id: conn.last_insert_rowid(),
        user_id: user,
        token: token.to_string(),
        expires_at,
        is_revoked: false,
    })
}

fn find_token(conn: &Connection, token: &str) -> Result<Option<RefreshToken>> {
    Ok(conn
        .query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token = ?1"),
            params![token],
            row_to_token,
        )
        .optional()?)
}

fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<RefreshToken> {
    let expires: String = row.get(3)?;
    let revoked: i64 = row.get(4)?;
    Ok(RefreshToken {
        id: row.get(0)?,
        user_id: UserId(row.get(1)?),
        token: row.get(2)?,
        expires_at: parse_timestamp(3, &expires)?,
        is_revoked: revoked != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn open_with_user() -> (tempfile::TempDir, Database, UserId) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("tokens.db")).unwrap();
        let user = db.create_user("alice", "a@example.org", "h").unwrap().id;
        (dir, db, user)
    }

    #[test]
    fn rotation_revokes_the_old_token() {
        let (_dir, mut db, user) = open_with_user();
        let now = Utc::now();
        db.insert_refresh_token(user, "old", now + Duration::days(30))
            .unwrap();

        let issued = db
            .rotate_refresh_token("old", "new", now, now + Duration::days(30))
            .unwrap()
            .unwrap();
        assert_eq!(issued.user_id, user);
        assert!(db.find_refresh_token("old").unwrap().unwrap().is_revoked);

        // Replaying the rotated token fails.
        assert!(db
            .rotate_refresh_token("old", "again", now, now + Duration::days(30))
            .unwrap()
            .is_none());
    }

    #[test]
    fn expired_token_does_not_rotate() {
        let (_dir, mut db, user) = open_with_user();
        let now = Utc::now();
        db.insert_refresh_token(user, "stale", now - Duration::seconds(1))
            .unwrap();

        assert!(db
            .rotate_refresh_token("stale", "fresh", now, now + Duration::days(1))
            .unwrap()
            .is_none());
        assert!(db.find_refresh_token("fresh").unwrap().is_none());
    }

    #[test]
    fn revoke_is_idempotent() {
        let (_dir, db, user) = open_with_user();
        db.insert_refresh_token(user, "t", Utc::now() + Duration::days(1))
            .unwrap();

        assert!(db.revoke_refresh_token("t").unwrap());
        assert!(!db.revoke_refresh_token("t").unwrap());
        assert!(!db.revoke_refresh_token("unknown").unwrap());
    }

    #[test]
    fn purge_removes_dead_tokens() {
        let (_dir, db, user) = open_with_user();
        let now = Utc::now();
        db.insert_refresh_token(user, "expired", now - Duration::days(1))
            .unwrap();
        db.insert_refresh_token(user, "live", now + Duration::days(1))
            .unwrap();
        db.insert_refresh_token(user, "revoked", now + Duration::days(1))
            .unwrap();
        db.revoke_refresh_token("revoked").unwrap();

        assert_eq!(db.purge_expired_refresh_tokens(now).unwrap(), 2);
        assert!(db.find_refresh_token("live").unwrap().is_some());
    }
}
