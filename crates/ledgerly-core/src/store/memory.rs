use std::collections::HashMap;
use std::sync::Mutex;

use super::{KeyValueStore, StorageError, StoreKey};

/// In-process store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StoreKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<StoreKey, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(&key).cloned())
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key, value.to_string());
        Ok(())
    }

    fn delete(&self, key: StoreKey) -> Result<(), StorageError> {
        self.lock()?.remove(&key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.lock()?.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_contract() {
        super::super::check_contract(&MemoryStore::new());
    }
}
