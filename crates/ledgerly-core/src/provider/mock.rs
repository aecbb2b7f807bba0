use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

use super::{
    AuthEvent, AuthStateChange, IdentityProvider, OAuthProvider, OAuthTokens, ProviderError,
    ProviderResponse, SignUp, EVENT_CHANNEL_CAPACITY,
};
use crate::auth::validation::validate_email;
use crate::auth::Session;
use crate::models::{Profile, User};

/// Account present in a freshly seeded mock
pub const SEED_EMAIL: &str = "KuriZd@protonmaIL.com";
pub const SEED_SECRET: &str = "a";

/// Simulated network latency for the mock provider.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(1000);

/// Prefix of tokens minted by the mock
pub const TOKEN_PREFIX: &str = "fake-jwt-token-";

/// Live tokens kept per account; issuing another retires the oldest.
pub const MAX_TOKENS_PER_ACCOUNT: usize = 5;

struct Account {
    user: User,
    secret: String,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default)]
struct MockState {
    accounts: Vec<Account>,
    /// User id to live tokens, oldest first.
    tokens: HashMap<String, VecDeque<String>>,
}

impl MockState {
    fn find(&self, email: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.user.has_email(email))
    }

    fn issue(&mut self, user: &User) -> Session {
        let session = Session::mint(user, TOKEN_PREFIX);
        let live = self.tokens.entry(user.id.clone()).or_default();
        if live.len() >= MAX_TOKENS_PER_ACCOUNT {
            live.pop_front();
        }
        live.push_back(session.token.clone());
        session
    }

    fn is_active(&self, session: &Session) -> bool {
        self.tokens
            .get(&session.user_id)
            .is_some_and(|live| live.contains(&session.token))
    }

    fn revoke(&mut self, session: &Session) {
        if let Some(live) = self.tokens.get_mut(&session.user_id) {
            live.retain(|t| t != &session.token);
        }
    }
}

/// In-memory identity provider.
///
/// The account table belongs to this instance; construct one per process (or
/// per test) and inject it into the session service.
pub struct MockProvider {
    state: Mutex<MockState>,
    latency: Duration,
    events: broadcast::Sender<AuthStateChange>,
    calls: AtomicUsize,
}

impl MockProvider {
    /// Mock seeded with the demo account.
    pub fn new() -> Self {
        Self::empty().with_account(SEED_EMAIL, SEED_SECRET)
    }

    /// Mock with no accounts.
    pub fn empty() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(MockState::default()),
            latency: DEFAULT_LATENCY,
            events,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_account(mut self, email: &str, secret: &str) -> Self {
        let account = Account {
            user: User::new(Uuid::new_v4().to_string(), email),
            secret: secret.to_string(),
        };
        self.state.get_mut().accounts.push(account);
        self
    }

    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    pub async fn active_token_count(&self) -> usize {
        self.state.lock().await.tokens.values().map(VecDeque::len).sum()
    }

    /// Number of provider calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Revoke every issued token and announce the expiry, as a hosted
    /// provider would when sessions time out server-side.
    pub async fn expire_all(&self) {
        self.state.lock().await.tokens.clear();
        debug!("Mock provider expired all sessions");
        let _ = self
            .events
            .send(AuthStateChange::new(AuthEvent::SessionExpired, None));
    }

    async fn begin_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        secret: &str,
    ) -> Result<ProviderResponse<Session>, ProviderError> {
        self.begin_call().await;
        let mut state = self.state.lock().await;

        let user = state
            .find(email)
            .filter(|a| a.secret == secret)
            .map(|a| a.user.clone())
            .ok_or(ProviderError::Unauthorized)?;

        Ok(ProviderResponse::new(200, state.issue(&user)))
    }

    async fn sign_up(
        &self,
        email: &str,
        secret: &str,
    ) -> Result<ProviderResponse<SignUp>, ProviderError> {
        self.begin_call().await;
        if !validate_email(email) {
            return Err(ProviderError::InvalidEmail);
        }

        let mut state = self.state.lock().await;
        if state.find(email).is_some() {
            return Err(ProviderError::AlreadyExists);
        }

        let user = User::new(Uuid::new_v4().to_string(), email);
        let session = state.issue(&user);
        state.accounts.push(Account {
            user: user.clone(),
            secret: secret.to_string(),
        });

        Ok(ProviderResponse::new(
            201,
            SignUp {
                user,
                session: Some(session),
            },
        ))
    }

    async fn sign_out(&self, session: &Session) -> Result<(), ProviderError> {
        self.begin_call().await;
        self.state.lock().await.revoke(session);
        Ok(())
    }

    async fn get_session(&self, session: &Session) -> Result<Option<Session>, ProviderError> {
        self.begin_call().await;
        let state = self.state.lock().await;
        Ok(state.is_active(session).then(|| session.clone()))
    }

    async fn fetch_profile(&self, session: &Session) -> Result<Option<Profile>, ProviderError> {
        self.begin_call().await;
        let state = self.state.lock().await;
        if !state.is_active(session) {
            return Err(ProviderError::Unauthorized);
        }
        Ok(state
            .accounts
            .iter()
            .find(|a| a.user.id == session.user_id)
            .map(|a| Profile {
                email: Some(a.user.email.clone()),
                ..Default::default()
            }))
    }

    fn oauth_authorize_url(
        &self,
        provider: OAuthProvider,
        _redirect_to: &str,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported(format!(
            "{} sign-in with the mock provider",
            provider.as_str()
        )))
    }

    async fn session_from_oauth(
        &self,
        _tokens: OAuthTokens,
    ) -> Result<ProviderResponse<Session>, ProviderError> {
        Err(ProviderError::Unsupported(
            "OAuth sign-in with the mock provider".to_string(),
        ))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock() -> MockProvider {
        MockProvider::new().with_latency(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_seeded_login_is_case_insensitive() {
        let provider = mock();
        let first = provider
            .sign_in_with_password("kurizd@protonmail.com", "a")
            .await
            .unwrap();
        assert_eq!(first.status, 200);
        assert_eq!(first.data.email, SEED_EMAIL);
        assert!(first.data.token.starts_with(TOKEN_PREFIX));

        let second = provider
            .sign_in_with_password("KURIZD@PROTONMAIL.COM", "a")
            .await
            .unwrap();
        assert_ne!(first.data.token, second.data.token);
    }

    #[tokio::test]
    async fn test_login_requires_exact_secret() {
        let provider = mock();
        let err = provider
            .sign_in_with_password("kurizd@protonmail.com", "A")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized));
        assert_eq!(err.status(), 401);

        assert!(provider
            .sign_in_with_password("nobody@protonmail.com", "a")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_signup_then_duplicate() {
        let provider = mock();
        let created = provider.sign_up("test@fail.com", "Abcdefg!").await.unwrap();
        assert_eq!(created.status, 201);
        assert_eq!(created.data.user.email, "test@fail.com");
        assert!(created.data.session.is_some());

        let err = provider
            .sign_up("TEST@fail.com", "Abcdefg!")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists));
        assert_eq!(err.status(), 409);
        assert_eq!(provider.account_count().await, 2);
    }

    #[tokio::test]
    async fn test_sign_out_revokes_token() {
        let provider = mock();
        let session = provider
            .sign_in_with_password(SEED_EMAIL, SEED_SECRET)
            .await
            .unwrap()
            .data;
        assert!(provider.get_session(&session).await.unwrap().is_some());

        provider.sign_out(&session).await.unwrap();
        assert!(provider.get_session(&session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expire_all_broadcasts() {
        let provider = mock();
        let mut rx = provider.subscribe();
        let session = provider
            .sign_in_with_password(SEED_EMAIL, SEED_SECRET)
            .await
            .unwrap()
            .data;

        provider.expire_all().await;
        let change = rx.recv().await.unwrap();
        assert_eq!(change.event, AuthEvent::SessionExpired);
        assert!(provider.get_session(&session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeated_logins_retire_oldest_tokens() {
        let provider = mock();
        let mut sessions = Vec::new();
        for _ in 0..MAX_TOKENS_PER_ACCOUNT + 3 {
            sessions.push(
                provider
                    .sign_in_with_password(SEED_EMAIL, SEED_SECRET)
                    .await
                    .unwrap()
                    .data,
            );
        }

        assert_eq!(provider.active_token_count().await, MAX_TOKENS_PER_ACCOUNT);
        assert!(provider.get_session(&sessions[0]).await.unwrap().is_none());
        let newest = sessions.last().unwrap();
        assert!(provider.get_session(newest).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_signups_stay_within_token_cap() {
        let provider = mock();
        for i in 0..10 {
            provider
                .sign_up(&format!("user{}@ledgerly.mx", i), "Abcdefg!")
                .await
                .unwrap();
        }
        // One live token per fresh account
        assert_eq!(provider.active_token_count().await, 10);

        provider.expire_all().await;
        assert_eq!(provider.active_token_count().await, 0);
    }

    #[tokio::test]
    async fn test_oauth_is_unsupported() {
        let provider = mock();
        assert!(matches!(
            provider.oauth_authorize_url(OAuthProvider::Google, "ledgerly://cb"),
            Err(ProviderError::Unsupported(_))
        ));
        let tokens = OAuthTokens {
            access_token: "t".to_string(),
            refresh_token: None,
            expires_in: None,
        };
        let err = provider.session_from_oauth(tokens).await.unwrap_err();
        assert_eq!(err.status(), 501);
    }

    #[tokio::test]
    async fn test_profile_for_active_session() {
        let provider = mock();
        let session = provider
            .sign_in_with_password(SEED_EMAIL, SEED_SECRET)
            .await
            .unwrap()
            .data;
        let profile = provider.fetch_profile(&session).await.unwrap().unwrap();
        assert_eq!(profile.email.as_deref(), Some(SEED_EMAIL));
        assert_eq!(provider.calls(), 2);
    }
}
