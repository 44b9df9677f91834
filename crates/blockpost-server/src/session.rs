//! Access and refresh tokens.
//!
//! Access tokens are stateless: `base64url(claims_json).base64url(sig)`,
//! signed with the server's Ed25519 key and checked by signature and
//! expiry alone. Refresh tokens are opaque random strings persisted in
//! `refresh_tokens`; every use rotates them.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use blockpost_shared::constants::REFRESH_TOKEN_BYTES;
use blockpost_shared::UserId;
use blockpost_store::{Database, User};

use crate::error::ServerError;

/// Claims carried by an access token. Times are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: UserId,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and checks access tokens.
pub struct TokenSigner {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl TokenSigner {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    pub fn sign(&self, claims: &AccessClaims) -> Result<String, ServerError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| ServerError::Internal(format!("claims encoding failed: {e}")))?;
        let signature = self.signing_key.sign(&payload);
        Ok(format!(
            "{}.{}",
            B64URL.encode(&payload),
            B64URL.encode(signature.to_bytes())
        ))
    }

    /// Return the claims of a well-signed, unexpired token.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, ServerError> {
        let invalid = || ServerError::Unauthorized("invalid access token".into());

        let (payload_b64, signature_b64) = token.split_once('.').ok_or_else(invalid)?;
        let payload = B64URL.decode(payload_b64).map_err(|_| invalid())?;
        let signature_bytes = B64URL.decode(signature_b64).map_err(|_| invalid())?;
        let signature = Signature::from_slice(&signature_bytes).map_err(|_| invalid())?;

        self.verifying_key
            .verify(&payload, &signature)
            .map_err(|_| invalid())?;

        let claims: AccessClaims = serde_json::from_slice(&payload).map_err(|_| invalid())?;
        if now.timestamp() >= claims.exp {
            return Err(ServerError::Unauthorized("access token expired".into()));
        }
        Ok(claims)
    }
}

/// What a successful login or refresh hands back.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

pub struct SessionManager {
    signer: TokenSigner,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

/// `now + ttl`, or `Internal` when the sum leaves chrono's range.
fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, ServerError> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| ServerError::Internal(format!("token lifetime {ttl} out of range")))
}

fn new_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl SessionManager {
    pub fn new(signer: TokenSigner, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            signer,
            access_ttl,
            refresh_ttl,
        }
    }

    fn access_token_for(
        &self,
        user: UserId,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ServerError> {
        self.signer.sign(&AccessClaims {
            sub: user,
            email: email.to_string(),
            iat: now.timestamp(),
            exp: expiry(now, self.access_ttl)?.timestamp(),
        })
    }

    /// Issue a fresh pair for an authenticated user.
    pub fn issue_for(&self, db: &Database, user: &User) -> Result<TokenPair, ServerError> {
        let now = Utc::now();
        let access_token = self.access_token_for(user.id, &user.email, now)?;
        let refresh_expires = expiry(now, self.refresh_ttl)?;
        let refresh = db.insert_refresh_token(user.id, &new_refresh_token(), refresh_expires)?;
        db.touch_last_seen(user.id)?;

        info!(user = %user.id, "Session issued");
        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
            token_type: "bearer",
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Trade a live refresh token for a new pair. The presented token is
    /// revoked in the same storage transaction that stores its successor,
    /// so it can be used at most once.
    pub fn refresh(&self, db: &mut Database, presented: &str) -> Result<TokenPair, ServerError> {
        let now = Utc::now();
        let refresh_expires = expiry(now, self.refresh_ttl)?;
        let Some(rotated) =
            db.rotate_refresh_token(presented, &new_refresh_token(), now, refresh_expires)?
        else {
            debug!("Refresh rejected: unknown, revoked or expired token");
            return Err(ServerError::Unauthorized("invalid refresh token".into()));
        };

        let user = db.get_user(rotated.user_id)?;
        let access_token = self.access_token_for(user.id, &user.email, now)?;

        info!(user = %user.id, "Session refreshed");
        Ok(TokenPair {
            access_token,
            refresh_token: rotated.token,
            token_type: "bearer",
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Revoke a refresh token. Unknown and already revoked tokens succeed.
    pub fn logout(&self, db: &Database, token: &str) -> Result<(), ServerError> {
        if db.revoke_refresh_token(token)? {
            info!("Session revoked");
        }
        Ok(())
    }

    /// Revoke every refresh token of `user`. Access tokens already issued
    /// stay valid until they expire.
    pub fn logout_all(&self, db: &Database, user: UserId) -> Result<usize, ServerError> {
        let revoked = db.revoke_all_refresh_tokens(user)?;
        info!(user = %user, revoked, "All sessions revoked");
        Ok(revoked)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, ServerError> {
        self.signer.verify(token, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::open_db;
    use std::sync::{Arc, Mutex};

    fn manager() -> SessionManager {
        SessionManager::new(
            TokenSigner::generate(),
            Duration::seconds(3600),
            Duration::days(30),
        )
    }

    #[test]
    fn test_access_token_round_trip() {
        let signer = TokenSigner::from_seed(&[7u8; 32]);
        let now = Utc::now();
        let claims = AccessClaims {
            sub: UserId(3),
            email: "c@example.org".into(),
            iat: now.timestamp(),
            exp: now.timestamp() + 60,
        };

        let token = signer.sign(&claims).unwrap();
        assert_eq!(signer.verify(&token, now).unwrap(), claims);
        assert!(signer.verify(&token, now + Duration::seconds(61)).is_err());

        let other = TokenSigner::from_seed(&[8u8; 32]);
        assert!(other.verify(&token, now).is_err());
        assert!(signer.verify("garbage", now).is_err());
    }

    #[test]
    fn test_tampered_claims_are_rejected() {
        let signer = TokenSigner::generate();
        let now = Utc::now();
        let token = signer
            .sign(&AccessClaims {
                sub: UserId(1),
                email: "a@example.org".into(),
                iat: now.timestamp(),
                exp: now.timestamp() + 60,
            })
            .unwrap();

        let (_, sig) = token.split_once('.').unwrap();
        let forged_claims = AccessClaims {
            sub: UserId(2),
            email: "a@example.org".into(),
            iat: now.timestamp(),
            exp: now.timestamp() + 60,
        };
        let forged = format!(
            "{}.{}",
            B64URL.encode(serde_json::to_vec(&forged_claims).unwrap()),
            sig
        );
        assert!(signer.verify(&forged, now).is_err());
    }

    #[test]
    fn test_rotation_prevents_replay() {
        let mut t = open_db();
        let sessions = manager();
        let user = t.db.create_user("ann", "ann@example.org", "h").unwrap();

        let first = sessions.issue_for(&t.db, &user).unwrap();
        let claims = sessions.verify_access(&first.access_token).unwrap();
        assert_eq!(claims.sub, user.id);

        let second = sessions.refresh(&mut t.db, &first.refresh_token).unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        assert!(matches!(
            sessions.refresh(&mut t.db, &first.refresh_token),
            Err(ServerError::Unauthorized(_))
        ));
        assert!(sessions.refresh(&mut t.db, &second.refresh_token).is_ok());
    }

    #[test]
    fn test_concurrent_refresh_has_one_winner() {
        let t = open_db();
        let sessions = Arc::new(manager());
        let user = t.db.create_user("ann", "ann@example.org", "h").unwrap();
        let pair = sessions.issue_for(&t.db, &user).unwrap();

        let db = Arc::new(Mutex::new(t.db));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = db.clone();
                let sessions = sessions.clone();
                let token = pair.refresh_token.clone();
                std::thread::spawn(move || {
                    let mut db = db.lock().unwrap();
                    sessions.refresh(&mut db, &token).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_logout_all_revokes_every_session() {
        let mut t = open_db();
        let sessions = manager();
        let ann = t.db.create_user("ann", "ann@example.org", "h").unwrap();
        let bo = t.db.create_user("bo", "bo@example.org", "h").unwrap();
        let laptop = sessions.issue_for(&t.db, &ann).unwrap();
        let phone = sessions.issue_for(&t.db, &ann).unwrap();
        let other = sessions.issue_for(&t.db, &bo).unwrap();

        assert_eq!(sessions.logout_all(&t.db, ann.id).unwrap(), 2);
        assert_eq!(sessions.logout_all(&t.db, ann.id).unwrap(), 0);

        for token in [&laptop.refresh_token, &phone.refresh_token] {
            assert!(sessions.refresh(&mut t.db, token).is_err());
        }
        assert!(sessions.refresh(&mut t.db, &other.refresh_token).is_ok());
    }

    #[test]
    fn test_out_of_range_lifetime_is_an_error() {
        let db = Mutex::new(open_db());
        let sessions = SessionManager::new(
            TokenSigner::generate(),
            Duration::seconds(3600),
            Duration::days(100_000_000),
        );
        let user = {
            let t = db.lock().unwrap();
            t.db.create_user("ann", "ann@example.org", "h").unwrap()
        };

        let result = {
            let t = db.lock().unwrap();
            sessions.issue_for(&t.db, &user)
        };
        assert!(matches!(result, Err(ServerError::Internal(_))));

        assert!(!db.is_poisoned());
        let t = db.lock().unwrap();
        assert_eq!(t.db.purge_expired_refresh_tokens(Utc::now()).unwrap(), 0);
    }

    #[test]
    fn test_logout_is_idempotent() {
        let mut t = open_db();
        let sessions = manager();
        let user = t.db.create_user("ann", "ann@example.org", "h").unwrap();
        let pair = sessions.issue_for(&t.db, &user).unwrap();

        sessions.logout(&t.db, &pair.refresh_token).unwrap();
        sessions.logout(&t.db, &pair.refresh_token).unwrap();
        sessions.logout(&t.db, "never-issued").unwrap();

        assert!(matches!(
            sessions.refresh(&mut t.db, &pair.refresh_token),
            Err(ServerError::Unauthorized(_))
        ));
    }
}
