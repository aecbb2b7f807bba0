//! Ledgerly core - session lifecycle for the Ledgerly app.
//!
//! This crate owns everything between the login/signup screens and the
//! identity provider:
//! - `auth`: session service, credential store, validation and flow control
//! - `provider`: identity provider contract plus mock and Supabase adapters
//! - `store`: key-value persistence backends (keychain, sealed file, memory)
//! - `models`: users, profiles
//! - `config`: on-disk settings and provider environment

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod provider;
pub mod store;

pub use auth::{
    AuthFlowController, AuthSubscription, CredentialStore, RememberedCredential, Route,
    SecretChecks, SecretPolicy, Session, SessionService, SessionSettings,
};
pub use config::{AuthMode, Config, ProviderEnv, StoreBackend};
pub use error::{AuthError, ErrorKind, Field};
pub use models::{Profile, User};
pub use provider::{
    AuthEvent, AuthStateChange, IdentityProvider, MockProvider, OAuthProvider, SupabaseProvider,
};
