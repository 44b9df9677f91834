//! Sealed boxes: anonymous public-key encryption to one recipient.
//!
//! Recipients publish a single Ed25519 key. For encryption it is mapped to
//! its X25519 (Montgomery) form; the sender runs an ephemeral X25519
//! exchange against it, derives a one-off key with BLAKE3 and seals the
//! message with XChaCha20-Poly1305.
//!
//! Wire layout (base64): `ephemeral_pub (32) || nonce (24) || ciphertext`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::constants::{KDF_CONTEXT_SEALED_BOX, NONCE_SIZE, X25519_PUBKEY_SIZE};
use crate::error::CryptoError;
use crate::identity::{public_key_from_pem, Identity};

pub type SymmetricKey = [u8; 32];

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// BLAKE3 KDF with domain separation, bound to both public halves
fn derive_box_key(shared_secret: &[u8], ephemeral: &[u8], recipient: &[u8]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SEALED_BOX);
    hasher.update(shared_secret);
    hasher.update(ephemeral);
    hasher.update(recipient);
    *hasher.finalize().as_bytes()
}

/// Encrypt `message` so only the holder of `recipient_public_pem`'s private
/// key can read it. Returns base64.
pub fn encrypt_for_recipient(
    message: &[u8],
    recipient_public_pem: &str,
) -> Result<String, CryptoError> {
    let verifying_key = public_key_from_pem(recipient_public_pem)?;
    let recipient = PublicKey::from(verifying_key.to_montgomery().to_bytes());

    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);
    let shared = ephemeral_secret.diffie_hellman(&recipient);

    let key = derive_box_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient.as_bytes(),
    );
    let cipher = XChaCha20Poly1305::new((&key).into());
    let nonce_bytes = generate_nonce();
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), message)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(X25519_PUBKEY_SIZE + NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(ephemeral_public.as_bytes());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(output))
}

/// Open a sealed box with the recipient's PKCS#8 PEM private key.
pub fn decrypt(ciphertext_b64: &str, recipient_private_pem: &str) -> Result<Vec<u8>, CryptoError> {
    let identity = Identity::from_private_pem(recipient_private_pem)?;
    let data = BASE64
        .decode(ciphertext_b64.trim())
        .map_err(|_| CryptoError::InvalidEncoding)?;
    if data.len() < X25519_PUBKEY_SIZE + NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (ephemeral_bytes, rest) = data.split_at(X25519_PUBKEY_SIZE);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

    let mut ephemeral = [0u8; X25519_PUBKEY_SIZE];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = PublicKey::from(ephemeral);

    let secret = StaticSecret::from(identity.signing_key().to_scalar_bytes());
    let recipient = PublicKey::from(identity.verifying_key().to_montgomery().to_bytes());
    let shared = secret.diffie_hellman(&ephemeral_public);

    let key = derive_box_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient.as_bytes(),
    );
    let cipher = XChaCha20Poly1305::new((&key).into());
    cipher
        .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Decrypt to UTF-8 text, or `None` on any failure.
pub fn decrypt_to_string(ciphertext_b64: &str, recipient_private_pem: &str) -> Option<String> {
    decrypt(ciphertext_b64, recipient_private_pem)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let bob = Identity::generate();
        let sealed =
            encrypt_for_recipient(b"meet at noon", &bob.public_key_pem().unwrap()).unwrap();
        let opened = decrypt(&sealed, &bob.private_key_pem().unwrap()).unwrap();
        assert_eq!(opened, b"meet at noon");
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let bob = Identity::generate();
        let eve = Identity::generate();
        let sealed = encrypt_for_recipient(b"for bob", &bob.public_key_pem().unwrap()).unwrap();
        assert!(decrypt(&sealed, &eve.private_key_pem().unwrap()).is_err());
    }

    #[test]
    fn test_each_seal_is_fresh() {
        let bob = Identity::generate();
        let pem = bob.public_key_pem().unwrap();
        let a = encrypt_for_recipient(b"same", &pem).unwrap();
        let b = encrypt_for_recipient(b"same", &pem).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let bob = Identity::generate();
        let sealed = encrypt_for_recipient(b"payload", &bob.public_key_pem().unwrap()).unwrap();
        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = BASE64.encode(raw);
        assert!(decrypt(&tampered, &bob.private_key_pem().unwrap()).is_err());
    }

    #[test]
    fn test_garbage_input_fails() {
        let bob = Identity::generate();
        let pem = bob.private_key_pem().unwrap();
        assert!(decrypt("!!not base64!!", &pem).is_err());
        assert!(decrypt("AAAA", &pem).is_err());
        assert!(decrypt_to_string("AAAA", &pem).is_none());
    }
}
