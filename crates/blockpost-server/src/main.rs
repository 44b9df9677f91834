//! # blockpost-server
//!
//! Message ledger server for end-to-end encrypted chats.
//!
//! This binary provides:
//! - **Hash-chained ledger**: every send appends one block; each recipient
//!   gets its own transaction and ciphertext payload under it
//! - **Fan-out and history**: per-recipient copies in, one logical
//!   conversation per reader out, gated by current chat membership
//! - **Sessions**: signed short-lived access tokens and rotating,
//!   persisted refresh tokens
//! - **REST API** (axum) plus a server-sent event stream for live delivery
//!
//! The server never sees plaintext; clients encrypt and sign locally.

mod api;
mod chain;
mod config;
mod credentials;
mod error;
mod fanout;
mod history;
mod locks;
mod membership;
mod notify;
mod session;

#[cfg(test)]
mod testutil;

use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blockpost_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::error::ServerError;

fn purge_refresh_tokens(state: &AppState) -> Result<usize, ServerError> {
    let db = state.db()?;
    Ok(db.purge_expired_refresh_tokens(Utc::now())?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,blockpost_server=debug")),
        )
        .init();

    info!("Starting blockpost server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        registration_open = config.registration_open,
        debug_decrypt = config.debug_decrypt,
        "Instance settings"
    );
    if config.debug_decrypt {
        tracing::warn!("DEBUG_DECRYPT is on: clients may hand private keys to this server");
    }

    // -----------------------------------------------------------------------
    // 3. Open storage and build application state
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    let http_addr = config.http_addr;
    let app_state = AppState::new(db, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Refresh token cleanup and idle lock pruning (every 10 minutes)
    let housekeeping = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;

            match purge_refresh_tokens(&housekeeping) {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "Purged expired refresh tokens"),
                Err(e) => tracing::warn!(error = %e, "Refresh token purge failed"),
            }

            housekeeping.user_locks.prune_idle().await;
            housekeeping.chat_locks.prune_idle().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
