//! Fixtures shared by the service tests.

use blockpost_shared::{ChatId, ChatKind, Identity, UserId};
use blockpost_store::Database;

pub struct TestDb {
    // Held so the directory outlives the connection.
    dir: tempfile::TempDir,
    pub db: Database,
}

impl TestDb {
    /// A second, independent connection to the same database file.
    pub fn reopen(&self) -> Database {
        Database::open_at(&self.dir.path().join("server.db")).unwrap()
    }
}

pub fn open_db() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(&dir.path().join("server.db")).unwrap();
    TestDb { dir, db }
}

/// Register a user with a fresh identity whose public key is published.
pub fn user_with_key(db: &Database, name: &str) -> (UserId, Identity) {
    let id = db
        .create_user(name, &format!("{name}@example.org"), "unused-hash")
        .unwrap()
        .id;
    let identity = Identity::generate();
    db.set_public_key(id, &identity.public_key_pem().unwrap())
        .unwrap();
    (id, identity)
}

pub fn group(db: &mut Database, owner: UserId, members: &[UserId]) -> ChatId {
    db.create_chat(ChatKind::Group, Some("test group"), owner, None, members)
        .unwrap()
        .id
}
