use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::IdentityError;

/// A user's Ed25519 keypair.
///
/// Keys travel as PEM: the public half as SPKI (what the server stores per
/// user), the private half as PKCS#8 (never leaves the client except on
/// the debug decryption path).
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from a PKCS#8 PEM private key
    pub fn from_private_pem(pem: &str) -> Result<Self, IdentityError> {
        let signing_key = SigningKey::from_pkcs8_pem(pem.trim())
            .map_err(|e| IdentityError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { signing_key })
    }

    pub fn private_key_pem(&self) -> Result<String, IdentityError> {
        self.signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| IdentityError::Encoding(e.to_string()))
    }

    pub fn public_key_pem(&self) -> Result<String, IdentityError> {
        self.signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| IdentityError::Encoding(e.to_string()))
    }

    /// Sign a message, returning the base64 signature
    pub fn sign(&self, message: &[u8]) -> String {
        BASE64.encode(self.signing_key.sign(message).to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

/// Parse an SPKI PEM public key.
pub fn public_key_from_pem(pem: &str) -> Result<VerifyingKey, IdentityError> {
    VerifyingKey::from_public_key_pem(pem.trim())
        .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))
}

/// Verify a base64 signature against a PEM public key.
///
/// Any malformed input (bad PEM, bad base64, wrong signature length) is a
/// failed verification, not an error.
pub fn verify_signature(message: &[u8], signature_b64: &str, public_key_pem: &str) -> bool {
    let Ok(verifying_key) = public_key_from_pem(public_key_pem) else {
        return false;
    };
    let Ok(bytes) = BASE64.decode(signature_b64.trim()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    verifying_key.verify(message, &signature).is_ok()
}

/// `true` if `signature_b64` decodes to a well-formed Ed25519 signature.
pub fn is_signature_encoding(signature_b64: &str) -> bool {
    BASE64
        .decode(signature_b64.trim())
        .map(|bytes| Signature::from_slice(&bytes).is_ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let id = Identity::generate();
        let pem = id.public_key_pem().unwrap();
        let signature = id.sign(b"hello chain");

        assert!(verify_signature(b"hello chain", &signature, &pem));
        assert!(!verify_signature(b"hello chaim", &signature, &pem));
    }

    #[test]
    fn test_verify_fails_for_other_keypair() {
        let alice = Identity::generate();
        let mallory = Identity::generate();
        let signature = alice.sign(b"transfer");

        assert!(!verify_signature(
            b"transfer",
            &signature,
            &mallory.public_key_pem().unwrap()
        ));
    }

    #[test]
    fn test_private_pem_roundtrip() {
        let id = Identity::generate();
        let restored = Identity::from_private_pem(&id.private_key_pem().unwrap()).unwrap();
        assert_eq!(id.verifying_key(), restored.verifying_key());
    }

    #[test]
    fn test_public_pem_parses() {
        let id = Identity::generate();
        let pem = id.public_key_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(public_key_from_pem(&pem).unwrap(), id.verifying_key());
        assert!(public_key_from_pem("not a key").is_err());
    }

    #[test]
    fn test_malformed_signature_is_rejected() {
        let id = Identity::generate();
        let pem = id.public_key_pem().unwrap();
        assert!(!verify_signature(b"m", "%%%", &pem));
        assert!(!verify_signature(b"m", "AAAA", &pem));
        assert!(!is_signature_encoding("AAAA"));
        assert!(is_signature_encoding(&id.sign(b"m")));
    }
}
