//! Durable key-value persistence for credential records.
//!
//! Three backends implement [`KeyValueStore`]:
//! - `KeyringStore`: OS keychain via the `keyring` crate (preferred)
//! - `FileStore`: JSON file, optionally sealed with a passphrase
//! - `MemoryStore`: process-local, for tests and mock mode
//!
//! Only two logical records are ever stored, addressed by [`StoreKey`].

pub mod file;
pub mod keyring;
pub mod memory;

use thiserror::Error;

pub use self::file::FileStore;
pub use self::keyring::KeyringStore;
pub use self::memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode or decode record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to unseal store - wrong passphrase or corrupted file")]
    Unseal,

    #[error("Encryption error: {0}")]
    Crypto(String),
}

/// Fixed keys for the persisted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    RememberedCredential,
    Session,
}

impl StoreKey {
    pub const ALL: [StoreKey; 2] = [StoreKey::RememberedCredential, StoreKey::Session];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::RememberedCredential => "remembered_credential",
            StoreKey::Session => "session",
        }
    }
}

/// String-valued persistence with the usual get/set/delete semantics.
///
/// `delete` of a missing key succeeds. A `set` is visible to the next `get`
/// on the same store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: StoreKey) -> Result<Option<String>, StorageError>;

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StorageError>;

    fn delete(&self, key: StoreKey) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError> {
        for key in StoreKey::ALL {
            self.delete(key)?;
        }
        Ok(())
    }

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Shared contract checks run against every backend.
#[cfg(test)]
pub(crate) fn check_contract(store: &dyn KeyValueStore) {
    assert_eq!(store.get(StoreKey::Session).unwrap(), None);

    store.set(StoreKey::Session, "first").unwrap();
    assert_eq!(store.get(StoreKey::Session).unwrap().as_deref(), Some("first"));

    store.set(StoreKey::Session, "second").unwrap();
    assert_eq!(store.get(StoreKey::Session).unwrap().as_deref(), Some("second"));

    store.set(StoreKey::RememberedCredential, "cred").unwrap();
    store.delete(StoreKey::Session).unwrap();
    assert_eq!(store.get(StoreKey::Session).unwrap(), None);
    assert_eq!(
        store.get(StoreKey::RememberedCredential).unwrap().as_deref(),
        Some("cred")
    );

    // Deleting a missing key is a no-op
    store.delete(StoreKey::Session).unwrap();

    store.clear().unwrap();
    assert_eq!(store.get(StoreKey::RememberedCredential).unwrap(), None);
}
