//! Password hashing (Argon2id, PHC strings).

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;

use blockpost_store::User;

use crate::error::ServerError;

pub fn hash_password(password: &str) -> Result<String, ServerError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServerError::Internal(format!("password hashing failed: {e}")))
}

/// `false` for a wrong password and for an unparseable stored hash.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(password: String) -> Result<String, ServerError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ServerError::Internal(format!("hashing task failed: {e}")))?
}

/// Check a login attempt against the account looked up by email.
///
/// An unknown email and a wrong password give the same error.
pub async fn check_login(user: Option<User>, password: String) -> Result<User, ServerError> {
    let Some(user) = user else {
        return Err(ServerError::Unauthorized("invalid email or password".into()));
    };
    let stored = user.password_hash.clone();
    let ok = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| ServerError::Internal(format!("verification task failed: {e}")))?;
    if ok {
        Ok(user)
    } else {
        Err(ServerError::Unauthorized("invalid email or password".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_then_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("pw").unwrap(), hash_password("pw").unwrap());
    }

    #[test]
    fn test_garbage_hash_does_not_verify() {
        assert!(!verify_password("pw", "not-a-phc-string"));
    }

    #[tokio::test]
    async fn test_check_login() {
        let t = crate::testutil::open_db();
        let hash = hash_password_blocking("s3cret".into()).await.unwrap();
        let user = t.db.create_user("ann", "ann@example.org", &hash).unwrap();

        let ok = check_login(Some(user.clone()), "s3cret".into()).await.unwrap();
        assert_eq!(ok.id, user.id);
        assert!(matches!(
            check_login(Some(user), "wrong".into()).await,
            Err(ServerError::Unauthorized(_))
        ));
        assert!(matches!(
            check_login(None, "s3cret".into()).await,
            Err(ServerError::Unauthorized(_))
        ));
    }
}
