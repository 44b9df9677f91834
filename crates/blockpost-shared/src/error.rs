use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid base64 encoding")]
    InvalidEncoding,

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid public key PEM: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key PEM: {0}")]
    InvalidPrivateKey(String),

    #[error("Key encoding failed: {0}")]
    Encoding(String),
}
