use keyring::Entry;
use tracing::debug;

use super::{KeyValueStore, StorageError, StoreKey};

/// Keychain service name used when none is configured
pub const DEFAULT_SERVICE_NAME: &str = "ledgerly";

/// Whether this build talks to a real OS keychain. Elsewhere `keyring` only
/// has its mock store, where every entry handle starts empty.
pub const NATIVE_KEYCHAIN: bool = cfg!(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "windows",
    target_os = "linux"
));

/// OS keychain backend.
///
/// Each [`StoreKey`] is one keychain entry under the configured service name.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: StoreKey) -> Result<Entry, StorageError> {
        Entry::new(&self.service, key.as_str())
            .map_err(|e| StorageError::Backend(format!("Failed to create keyring entry: {}", e)))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StorageError::Backend(format!(
                "Failed to read {} from keychain: {}",
                key.as_str(),
                e
            ))),
        }
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StorageError> {
        self.entry(key)?.set_password(value).map_err(|e| {
            StorageError::Backend(format!("Failed to store {} in keychain: {}", key.as_str(), e))
        })
    }

    fn delete(&self, key: StoreKey) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => {
                debug!(key = key.as_str(), "Keychain entry already absent");
                Ok(())
            }
            Err(e) => Err(StorageError::Backend(format!(
                "Failed to delete {} from keychain: {}",
                key.as_str(),
                e
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::store::check_contract;

    #[test]
    fn test_keyring_store_contract() {
        if !NATIVE_KEYCHAIN {
            return;
        }
        let store = KeyringStore::new(format!("ledgerly-test-{}", Uuid::new_v4().simple()));

        // Containers and headless CI often have no keychain service at all
        if let Err(e) = store.set(StoreKey::Session, "ping") {
            eprintln!("skipping keychain contract: {}", e);
            return;
        }
        assert_eq!(store.get(StoreKey::Session).unwrap().as_deref(), Some("ping"));
        store.clear().unwrap();

        check_contract(&store);
    }
}
