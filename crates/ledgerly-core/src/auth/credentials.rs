use std::fmt;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::Session;
use crate::store::{KeyValueStore, MemoryStore, StorageError, StoreKey};

/// Version tag written into every persisted record
pub const RECORD_VERSION: u64 = 1;

/// Opt-in local copy of login credentials, used to pre-fill the login form.
///
/// Holding one does not grant access; it only allows re-authentication.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberedCredential {
    pub email: String,
    pub secret: String,
}

impl RememberedCredential {
    pub fn new(email: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for RememberedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RememberedCredential")
            .field("email", &self.email)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct SessionRecord {
    session: Session,
}

/// Typed access to the two persisted records.
///
/// Each record is a JSON object carrying a `version` tag. Records written by
/// an unknown version read back as absent.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    // ===== Remembered credential =====

    pub fn load_remembered(&self) -> Result<Option<RememberedCredential>, StorageError> {
        self.load_record(StoreKey::RememberedCredential)
    }

    /// Overwrites any previously remembered credential.
    pub fn remember(&self, credential: &RememberedCredential) -> Result<(), StorageError> {
        self.save_record(StoreKey::RememberedCredential, credential)
    }

    pub fn forget(&self) -> Result<(), StorageError> {
        self.backend.delete(StoreKey::RememberedCredential)
    }

    // ===== Session cache =====

    pub fn load_session(&self) -> Result<Option<Session>, StorageError> {
        Ok(self
            .load_record::<SessionRecord>(StoreKey::Session)?
            .map(|r| r.session))
    }

    pub fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        self.save_record(
            StoreKey::Session,
            &SessionRecord {
                session: session.clone(),
            },
        )
    }

    pub fn clear_session(&self) -> Result<(), StorageError> {
        self.backend.delete(StoreKey::Session)
    }

    /// Remove both records.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.backend.clear()
    }

    fn load_record<T: DeserializeOwned>(&self, key: StoreKey) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };

        let value: Value = serde_json::from_str(&raw)?;
        match value.get("version").and_then(Value::as_u64) {
            Some(RECORD_VERSION) => {
                debug!(key = key.as_str(), backend = self.backend.name(), "Record loaded");
                Ok(Some(serde_json::from_value(value)?))
            }
            version => {
                warn!(key = key.as_str(), ?version, "Ignoring record with unsupported version");
                Ok(None)
            }
        }
    }

    fn save_record<T: Serialize>(&self, key: StoreKey, record: &T) -> Result<(), StorageError> {
        let mut value = serde_json::to_value(record)?;
        if let Value::Object(ref mut map) = value {
            map.insert("version".to_string(), Value::from(RECORD_VERSION));
        }
        self.backend.set(key, &serde_json::to_string(&value)?)
    }
}
