//! Types and primitives shared by the blockpost store and server.
//!
//! Nothing here touches storage or the network: ids and chat kinds,
//! canonical ledger hashing, PEM identities with sign/verify, and sealed
//! boxes for the debug decryption path.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod hashing;
pub mod identity;
pub mod types;

pub use error::{CryptoError, IdentityError};
pub use hashing::BlockHeader;
pub use identity::Identity;
pub use types::{BlockId, ChatId, ChatKind, TransactionId, UserId};
