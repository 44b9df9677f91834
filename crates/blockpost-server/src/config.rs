//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use blockpost_shared::constants::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_HTTP_PORT, DEFAULT_REFRESH_TOKEN_TTL_DAYS,
    MAX_ACCESS_TOKEN_TTL_SECS, MAX_REFRESH_TOKEN_TTL_DAYS,
};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./blockpost.db`
    pub database_path: PathBuf,

    /// Ed25519 seed used to sign access tokens (hex-encoded, 64 chars).
    /// Env: `TOKEN_SIGNING_KEY`
    /// Default: none, a random key is generated at startup and every
    /// issued access token dies with the process.
    pub token_signing_key: Option<[u8; 32]>,

    /// Env: `ACCESS_TOKEN_TTL_SECS` (1..=604800)
    /// Default: `3600`
    pub access_token_ttl_secs: i64,

    /// Env: `REFRESH_TOKEN_TTL_DAYS` (1..=3650)
    /// Default: `30`
    pub refresh_token_ttl_days: i64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Whether new accounts can be registered.
    /// Env: `REGISTRATION_OPEN` (true/false)
    /// Default: `true`
    pub registration_open: bool,

    /// Enables the server-side decryption endpoint. Development only: the
    /// caller hands its private key to the server.
    /// Env: `DEBUG_DECRYPT` (true/false)
    /// Default: `false`
    pub debug_decrypt: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("token_signing_key", &self.token_signing_key.map(|_| "<set>"))
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_days", &self.refresh_token_ttl_days)
            .field("instance_name", &self.instance_name)
            .field("registration_open", &self.registration_open)
            .field("debug_decrypt", &self.debug_decrypt)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./blockpost.db"),
            token_signing_key: None,
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_days: DEFAULT_REFRESH_TOKEN_TTL_DAYS,
            instance_name: "Blockpost Node".to_string(),
            registration_open: true,
            debug_decrypt: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(hex_key) = lookup("TOKEN_SIGNING_KEY") {
            match parse_hex_seed(&hex_key) {
                Ok(key) => config.token_signing_key = Some(key),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid TOKEN_SIGNING_KEY, generating an ephemeral key"
                    );
                }
            }
        }

        if let Some(val) = lookup("ACCESS_TOKEN_TTL_SECS") {
            match parse_bounded(&val, MAX_ACCESS_TOKEN_TTL_SECS) {
                Some(n) => config.access_token_ttl_secs = n,
                None => tracing::warn!(
                    value = %val,
                    max = MAX_ACCESS_TOKEN_TTL_SECS,
                    "Invalid ACCESS_TOKEN_TTL_SECS, using default"
                ),
            }
        }

        if let Some(val) = lookup("REFRESH_TOKEN_TTL_DAYS") {
            match parse_bounded(&val, MAX_REFRESH_TOKEN_TTL_DAYS) {
                Some(n) => config.refresh_token_ttl_days = n,
                None => tracing::warn!(
                    value = %val,
                    max = MAX_REFRESH_TOKEN_TTL_DAYS,
                    "Invalid REFRESH_TOKEN_TTL_DAYS, using default"
                ),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(val) = lookup("REGISTRATION_OPEN") {
            config.registration_open = val != "false" && val != "0";
        }

        if let Some(val) = lookup("DEBUG_DECRYPT") {
            config.debug_decrypt = val == "true" || val == "1";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a positive integer no larger than `max`.
fn parse_bounded(raw: &str, max: i64) -> Option<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|n| (1..=max).contains(n))
}

/// Parse a 64-character hex string into a 32-byte seed.
fn parse_hex_seed(raw: &str) -> Result<[u8; 32], String> {
    let raw = raw.trim();
    if raw.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", raw.len()));
    }
    let bytes = hex::decode(raw).map_err(|e| e.to_string())?;
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&bytes);
    Ok(seed)
}
