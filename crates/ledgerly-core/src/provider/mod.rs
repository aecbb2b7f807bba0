//! Identity provider contract and its adapters.
//!
//! The session service only talks to a provider through [`IdentityProvider`].
//! Two adapters ship with the crate:
//! - `MockProvider`: in-memory account table with simulated latency
//! - `SupabaseProvider`: Supabase GoTrue over HTTPS, including OAuth sign-in

pub mod error;
pub mod mock;
pub mod oauth;
pub mod supabase;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::auth::Session;
use crate::models::{Profile, User};

pub use error::ProviderError;
pub use mock::MockProvider;
pub use oauth::{OAuthProvider, OAuthTokens};
pub use supabase::SupabaseProvider;

/// Capacity of a provider's auth-state broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    SessionExpired,
}

/// An `(event, session)` pair, as delivered to auth-state listeners.
#[derive(Debug, Clone)]
pub struct AuthStateChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

impl AuthStateChange {
    pub fn new(event: AuthEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }
}

/// Provider result with the HTTP-style status it was reported with.
#[derive(Debug, Clone)]
pub struct ProviderResponse<T> {
    pub status: u16,
    pub data: T,
}

impl<T> ProviderResponse<T> {
    pub fn new(status: u16, data: T) -> Self {
        Self { status, data }
    }
}

/// Result of a signup. `session` is present only when the provider signs the
/// new account in straight away.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub user: User,
    pub session: Option<Session>,
}

/// External system of record for accounts and credential checks.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Short adapter name for logs.
    fn name(&self) -> &'static str;

    async fn sign_in_with_password(
        &self,
        email: &str,
        secret: &str,
    ) -> Result<ProviderResponse<Session>, ProviderError>;

    async fn sign_up(&self, email: &str, secret: &str)
        -> Result<ProviderResponse<SignUp>, ProviderError>;

    async fn sign_out(&self, session: &Session) -> Result<(), ProviderError>;

    /// Verify a cached session, refreshing it if the provider supports that.
    /// `Ok(None)` means the provider no longer accepts it.
    async fn get_session(&self, session: &Session) -> Result<Option<Session>, ProviderError>;

    async fn fetch_profile(&self, session: &Session) -> Result<Option<Profile>, ProviderError>;

    /// Browser URL that starts third-party sign-in and redirects back to
    /// `redirect_to` with tokens.
    fn oauth_authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> Result<String, ProviderError>;

    /// Resolve the tokens from an OAuth redirect into a session.
    async fn session_from_oauth(
        &self,
        tokens: OAuthTokens,
    ) -> Result<ProviderResponse<Session>, ProviderError>;

    /// Stream of provider-originated auth-state changes (expiry, refresh).
    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange>;
}
