use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{KeyValueStore, StorageError, StoreKey};

/// Credentials file name in the data directory
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Current on-disk layout version
const FILE_VERSION: u32 = 1;

/// Salt length for argon2 key derivation
const SALT_LEN: usize = 16;

/// ChaCha20-Poly1305 nonce length
const NONCE_LEN: usize = 12;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileContents {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entries: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sealed: Option<SealedBox>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedBox {
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

/// JSON file backend.
///
/// With a passphrase the entry map is encrypted as a whole: a key is derived
/// with argon2 from the passphrase and a per-write salt, then the map is
/// sealed with ChaCha20-Poly1305. Without one, entries are stored in the clear.
pub struct FileStore {
    path: PathBuf,
    passphrase: Option<String>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            passphrase: None,
        }
    }

    /// Store rooted in `dir`, using the default file name.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CREDENTIALS_FILE))
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn is_sealed(&self) -> bool {
        self.passphrase.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let contents: FileContents = serde_json::from_str(&raw)?;
        if contents.version != FILE_VERSION {
            return Err(StorageError::Backend(format!(
                "Unsupported credentials file version {}",
                contents.version
            )));
        }

        match (contents.sealed, &self.passphrase) {
            (Some(sealed), Some(passphrase)) => unseal(&sealed, passphrase),
            (Some(_), None) => Err(StorageError::Unseal),
            (None, _) => Ok(contents.entries.unwrap_or_default()),
        }
    }

    fn write_entries(&self, entries: BTreeMap<String, String>) -> Result<(), StorageError> {
        let contents = match &self.passphrase {
            Some(passphrase) => FileContents {
                version: FILE_VERSION,
                entries: None,
                sealed: Some(seal(&entries, passphrase)?),
            },
            None => FileContents {
                version: FILE_VERSION,
                entries: Some(entries),
                sealed: None,
            },
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&contents)?)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = ?self.path, sealed = self.is_sealed(), "Credentials file written");
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>, StorageError> {
        Ok(self.read_entries()?.remove(key.as_str()))
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StorageError> {
        let mut entries = self.read_entries()?;
        entries.insert(key.as_str().to_string(), value.to_string());
        self.write_entries(entries)
    }

    fn delete(&self, key: StoreKey) -> Result<(), StorageError> {
        let mut entries = self.read_entries()?;
        if entries.remove(key.as_str()).is_none() {
            return Ok(());
        }
        self.write_entries(entries)
    }

    fn clear(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Key, StorageError> {
    let mut key = Key::default();
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StorageError::Crypto(e.to_string()))?;
    Ok(key)
}

fn seal(entries: &BTreeMap<String, String>, passphrase: &str) -> Result<SealedBox, StorageError> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let cipher = ChaCha20Poly1305::new(&derive_key(passphrase, &salt)?);
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let plaintext = serde_json::to_vec(entries)?;
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_slice())
        .map_err(|e| StorageError::Crypto(e.to_string()))?;

    Ok(SealedBox {
        salt: salt.to_vec(),
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

fn unseal(sealed: &SealedBox, passphrase: &str) -> Result<BTreeMap<String, String>, StorageError> {
    if sealed.nonce.len() != NONCE_LEN {
        return Err(StorageError::Unseal);
    }

    let cipher = ChaCha20Poly1305::new(&derive_key(passphrase, &sealed.salt)?);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
        .map_err(|_| StorageError::Unseal)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}
