/// Application name
pub const APP_NAME: &str = "blockpost";

/// `previous_hash` of the first block in the chain (64 zeros)
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";
/// Length of a hex-encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Block nonces are drawn from this range. They carry no proof-of-work.
pub const NONCE_MIN: i64 = 100_000;
pub const NONCE_MAX: i64 = 999_999;

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;
/// X25519 public key size in bytes
pub const X25519_PUBKEY_SIZE: usize = 32;

/// Access tokens live for one hour by default
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 3600;
/// Refresh tokens live for thirty days by default
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 30;
/// Longest configurable access token lifetime (one week)
pub const MAX_ACCESS_TOKEN_TTL_SECS: i64 = 7 * 24 * 3600;
/// Longest configurable refresh token lifetime (ten years)
pub const MAX_REFRESH_TOKEN_TTL_DAYS: i64 = 3650;
/// Random bytes behind one refresh token (hex-encoded on the wire)
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Key derivation context for sealed boxes (BLAKE3)
pub const KDF_CONTEXT_SEALED_BOX: &str = "blockpost-sealed-box-v1";

/// Rendered in place of a payload the debug decryptor could not open
pub const UNDECRYPTABLE_PLACEHOLDER: &str = "[undecryptable]";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
