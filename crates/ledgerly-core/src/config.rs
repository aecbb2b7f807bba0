//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the provider mode, credential backend, session policy and
//! last used email. It also reads the provider environment.
//!
//! Configuration is stored at `~/.config/ledgerly/config.json`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::{CredentialStore, SecretPolicy, SessionSettings};
use crate::provider::{IdentityProvider, MockProvider, SupabaseProvider};
use crate::store::file::FileStore;
use crate::store::keyring::{KeyringStore, DEFAULT_SERVICE_NAME, NATIVE_KEYCHAIN};
use crate::store::memory::MemoryStore;

/// Application name used for config/data directory paths
const APP_NAME: &str = "ledgerly";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_AUTH_MODE: &str = "LEDGERLY_AUTH_MODE";
pub const ENV_STORE_PASSPHRASE: &str = "LEDGERLY_STORE_PASSPHRASE";
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";

/// Which identity provider backs the session service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Mock,
    #[default]
    Supabase,
}

impl FromStr for AuthMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(AuthMode::Mock),
            "supabase" => Ok(AuthMode::Supabase),
            other => anyhow::bail!("Unknown auth mode '{}' (expected mock or supabase)", other),
        }
    }
}

/// Where credentials and the session cache are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Keyring,
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub last_email: Option<String>,
    pub auth_mode: AuthMode,
    pub store_backend: StoreBackend,
    pub logout_forgets_credentials: bool,
    pub auto_login_on_signup: bool,
    pub secret_policy: SecretPolicy,
    pub mock_latency_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            last_email: None,
            auth_mode: AuthMode::default(),
            store_backend: StoreBackend::default(),
            logout_forgets_credentials: true,
            auto_login_on_signup: false,
            secret_policy: SecretPolicy::default(),
            mock_latency_ms: 1000,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_lookup(|key| std::env::var(key).ok())
    }

    fn apply_lookup(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(mode) = lookup(ENV_AUTH_MODE).filter(|v| !v.trim().is_empty()) {
            self.auth_mode = mode
                .parse()
                .with_context(|| format!("Invalid {}", ENV_AUTH_MODE))?;
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            policy: self.secret_policy,
            logout_forgets_credentials: self.logout_forgets_credentials,
            auto_login_on_signup: self.auto_login_on_signup,
        }
    }

    /// Backend actually used. Builds without a native keychain fall back to
    /// the file store.
    pub fn effective_store_backend(&self) -> StoreBackend {
        Self::resolve_backend(self.store_backend, NATIVE_KEYCHAIN)
    }

    fn resolve_backend(requested: StoreBackend, native_keychain: bool) -> StoreBackend {
        match requested {
            StoreBackend::Keyring if !native_keychain => StoreBackend::File,
            other => other,
        }
    }

    pub fn credential_store(&self) -> Result<CredentialStore> {
        let backend = self.effective_store_backend();
        if backend != self.store_backend {
            warn!(
                requested = ?self.store_backend,
                using = ?backend,
                "No native keychain on this platform, using the credential file"
            );
        }

        let store = match backend {
            StoreBackend::Keyring => CredentialStore::new(Arc::new(KeyringStore::new(
                DEFAULT_SERVICE_NAME,
            ))),
            StoreBackend::File => {
                let mut file = FileStore::in_dir(&self.data_dir()?);
                match std::env::var(ENV_STORE_PASSPHRASE) {
                    Ok(passphrase) if !passphrase.is_empty() => {
                        file = file.with_passphrase(passphrase);
                    }
                    _ => warn!(
                        path = %file.path().display(),
                        "Credential file is not sealed; set {} to encrypt it",
                        ENV_STORE_PASSPHRASE
                    ),
                }
                CredentialStore::new(Arc::new(file))
            }
            StoreBackend::Memory => CredentialStore::new(Arc::new(MemoryStore::new())),
        };
        debug!(backend = store.backend_name(), "Credential store ready");
        Ok(store)
    }

    /// Build the provider selected by `auth_mode`. Supabase mode requires
    /// `SUPABASE_URL` and `SUPABASE_ANON_KEY`.
    pub fn provider(&self) -> Result<Arc<dyn IdentityProvider>> {
        match self.auth_mode {
            AuthMode::Mock => Ok(Arc::new(
                MockProvider::new().with_latency(Duration::from_millis(self.mock_latency_ms)),
            )),
            AuthMode::Supabase => {
                let env = ProviderEnv::from_env()?;
                let provider = SupabaseProvider::new(&env.url, &env.api_key)
                    .context("Failed to create Supabase client")?;
                Ok(Arc::new(provider))
            }
        }
    }
}

/// Hosted provider endpoint and anonymous key.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderEnv {
    pub url: String,
    pub api_key: String,
}

impl fmt::Debug for ProviderEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEnv")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl ProviderEnv {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} is not set", key))
        };
        Ok(Self {
            url: required(ENV_SUPABASE_URL)?,
            api_key: required(ENV_SUPABASE_ANON_KEY)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.auth_mode, AuthMode::Supabase);
        assert_eq!(config.store_backend, StoreBackend::Keyring);
        assert!(config.logout_forgets_credentials);
        assert!(!config.auto_login_on_signup);
        assert_eq!(config.mock_latency_ms, 1000);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = Config {
            last_email: Some("a@b.com".to_string()),
            auth_mode: AuthMode::Mock,
            store_backend: StoreBackend::File,
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.last_email.as_deref(), Some("a@b.com"));
        assert_eq!(loaded.auth_mode, AuthMode::Mock);
        assert_eq!(loaded.store_backend, StoreBackend::File);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert!(config.last_email.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"auth_mode":"mock","secret_policy":{"min_length":12}}"#)
            .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.auth_mode, AuthMode::Mock);
        assert_eq!(config.secret_policy.min_length, 12);
        assert!(config.secret_policy.require_upper);
        assert!(config.logout_forgets_credentials);
    }

    #[test]
    fn test_env_overrides_auth_mode() {
        let mut config = Config::default();
        config
            .apply_lookup(lookup(&[(ENV_AUTH_MODE, " Mock ")]))
            .unwrap();
        assert_eq!(config.auth_mode, AuthMode::Mock);

        assert!(config
            .apply_lookup(lookup(&[(ENV_AUTH_MODE, "firebase")]))
            .is_err());
    }

    #[test]
    fn test_provider_env_trims_values() {
        let env = ProviderEnv::from_lookup(lookup(&[
            (ENV_SUPABASE_URL, " https://x.supabase.co \n"),
            (ENV_SUPABASE_ANON_KEY, "anon-key "),
        ]))
        .unwrap();
        assert_eq!(env.url, "https://x.supabase.co");
        assert_eq!(env.api_key, "anon-key");
        assert!(!format!("{:?}", env).contains("anon-key"));
    }

    #[test]
    fn test_provider_env_requires_both_values() {
        let err = ProviderEnv::from_lookup(lookup(&[(ENV_SUPABASE_URL, "https://x")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_SUPABASE_ANON_KEY));

        assert!(ProviderEnv::from_lookup(lookup(&[
            (ENV_SUPABASE_URL, "  "),
            (ENV_SUPABASE_ANON_KEY, "k"),
        ]))
        .is_err());
    }

    #[test]
    fn test_keyring_without_native_keychain_falls_back_to_file() {
        assert_eq!(
            Config::resolve_backend(StoreBackend::Keyring, false),
            StoreBackend::File
        );
        assert_eq!(
            Config::resolve_backend(StoreBackend::Keyring, true),
            StoreBackend::Keyring
        );
        assert_eq!(
            Config::resolve_backend(StoreBackend::Memory, false),
            StoreBackend::Memory
        );
    }

    #[test]
    fn test_default_backend_persists_on_this_build() {
        let backend = Config::default().effective_store_backend();
        if NATIVE_KEYCHAIN {
            assert_eq!(backend, StoreBackend::Keyring);
        } else {
            assert_eq!(backend, StoreBackend::File);
        }
    }

    #[tokio::test]
    async fn test_mock_mode_builds_provider() {
        let config = Config {
            auth_mode: AuthMode::Mock,
            ..Default::default()
        };
        assert_eq!(config.provider().unwrap().name(), "mock");
        assert_eq!(
            config.session_settings().policy,
            SecretPolicy::default()
        );
    }
}
