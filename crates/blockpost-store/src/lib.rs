//! # blockpost-store
//!
//! SQLite persistence for the blockpost server: accounts and published
//! keys, chats with membership and roles, the block/transaction/payload
//! ledger, and refresh tokens.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model. Multi-statement writes that must not interleave run inside
//! [`Database::write_transaction`].

pub mod chats;
pub mod database;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod tokens;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use ledger::NewTransaction;
pub use models::*;
