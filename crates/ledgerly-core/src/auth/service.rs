//! Session service: the single writer of session state.
//!
//! Every identity-changing operation (signup, login, logout) runs under one
//! async mutex, so two racing logins on the same device cannot interleave
//! their persistence. Reads of the current session never wait on that lock
//! or on the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{broadcast::error::RecvError, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::credentials::{CredentialStore, RememberedCredential};
use crate::auth::listener::{AuthSubscription, ListenerSlot};
use crate::auth::validation::{validate_email, SecretPolicy};
use crate::auth::Session;
use crate::error::{AuthError, Field};
use crate::models::{Profile, User};
use crate::provider::{
    AuthEvent, AuthStateChange, IdentityProvider, OAuthProvider, OAuthTokens,
};

/// Behavior switches for the session lifecycle.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub policy: SecretPolicy,
    /// Clear the remembered credential on logout.
    pub logout_forgets_credentials: bool,
    /// Adopt the session a provider returns from signup instead of waiting
    /// for verification.
    pub auto_login_on_signup: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            policy: SecretPolicy::default(),
            logout_forgets_credentials: true,
            auto_login_on_signup: false,
        }
    }
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    store: CredentialStore,
    settings: SessionSettings,
    current: RwLock<Option<Session>>,
    op_lock: Mutex<()>,
    listener: Arc<ListenerSlot>,
    refreshing: AtomicBool,
}

/// Mediates all identity-changing operations.
/// Clone is cheap - all clones share one state.
#[derive(Clone)]
pub struct SessionService {
    inner: Arc<Inner>,
}

impl SessionService {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: CredentialStore,
        settings: SessionSettings,
    ) -> Self {
        debug!(
            provider = provider.name(),
            store = store.backend_name(),
            "Session service created"
        );
        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                settings,
                current: RwLock::new(None),
                op_lock: Mutex::new(()),
                listener: Arc::new(ListenerSlot::default()),
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.provider.name()
    }

    // =========================================================================
    // Identity-changing operations
    // =========================================================================

    /// Register a new account.
    ///
    /// No session is created unless `auto_login_on_signup` is set and the
    /// provider signed the account in; otherwise the account waits on the
    /// provider's verification step.
    pub async fn signup(&self, email: &str, secret: &str) -> Result<User, AuthError> {
        if email.is_empty() {
            return Err(AuthError::MissingField(Field::Email));
        }
        if secret.is_empty() {
            return Err(AuthError::MissingField(Field::Secret));
        }
        if !validate_email(email) {
            return Err(AuthError::InvalidFormat);
        }
        let checks = self.inner.settings.policy.check(secret);
        if !checks.is_satisfied() {
            return Err(AuthError::WeakSecret(checks));
        }

        let _guard = self.inner.op_lock.lock().await;
        let response = self
            .inner
            .provider
            .sign_up(email, secret)
            .await
            .map_err(|e| {
                warn!(email = %email, error = %e, "Signup failed");
                AuthError::from(e)
            })?;

        let signup = response.data;
        info!(email = %signup.user.email, status = response.status, "Signup succeeded");

        match signup.session {
            Some(session) if self.inner.settings.auto_login_on_signup => {
                self.establish(&session);
                self.inner
                    .listener
                    .notify(AuthStateChange::new(AuthEvent::SignedIn, Some(session)));
            }
            _ => debug!(email = %signup.user.email, "Account pending verification"),
        }

        Ok(signup.user)
    }

    /// Authenticate and start a session.
    ///
    /// On success the remembered credential is rewritten: stored when
    /// `remember` is set, deleted otherwise. Storage failures at this point
    /// are logged and do not fail the login.
    pub async fn login(
        &self,
        email: &str,
        secret: &str,
        remember: bool,
    ) -> Result<Session, AuthError> {
        if email.is_empty() {
            return Err(AuthError::MissingField(Field::Email));
        }
        if secret.is_empty() {
            return Err(AuthError::MissingField(Field::Secret));
        }
        if !validate_email(email) {
            return Err(AuthError::InvalidFormat);
        }

        let _guard = self.inner.op_lock.lock().await;
        let response = self
            .inner
            .provider
            .sign_in_with_password(email, secret)
            .await
            .map_err(|e| {
                warn!(email = %email, error = %e, "Login failed");
                AuthError::from(e)
            })?;

        let session = response.data;
        self.establish(&session);

        let remembered = if remember {
            self.inner
                .store
                .remember(&RememberedCredential::new(email, secret))
        } else {
            self.inner.store.forget()
        };
        if let Err(e) = remembered {
            warn!(error = %e, remember, "Failed to update remembered credential");
        }

        self.inner
            .listener
            .notify(AuthStateChange::new(AuthEvent::SignedIn, Some(session.clone())));
        info!(email = %session.email, status = response.status, "Login successful");
        Ok(session)
    }

    /// End the current session. Always succeeds locally; a second call is a
    /// no-op.
    pub async fn logout(&self) {
        let _guard = self.inner.op_lock.lock().await;
        let previous = self.replace_current(None);

        if let Some(ref session) = previous {
            if let Err(e) = self.inner.provider.sign_out(session).await {
                warn!(error = %e, "Provider sign-out failed, clearing local session anyway");
            }
        }

        let cleared = if self.inner.settings.logout_forgets_credentials {
            self.inner.store.clear()
        } else {
            self.inner.store.clear_session()
        };
        if let Err(e) = cleared {
            warn!(error = %e, "Failed to clear stored credentials");
        }

        match previous {
            Some(session) => {
                info!(email = %session.email, "Logged out");
                self.inner
                    .listener
                    .notify(AuthStateChange::new(AuthEvent::SignedOut, None));
            }
            None => debug!("Logout with no active session"),
        }
    }

    /// URL that starts third-party sign-in in a browser.
    pub fn oauth_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> Result<String, AuthError> {
        Ok(self
            .inner
            .provider
            .oauth_authorize_url(provider, redirect_to)?)
    }

    /// Finish third-party sign-in from the redirect URL the browser landed
    /// on. The remembered credential is left alone; there is no password to
    /// remember.
    pub async fn complete_oauth(&self, callback_url: &str) -> Result<Session, AuthError> {
        if callback_url.trim().is_empty() {
            return Err(AuthError::MissingField(Field::Callback));
        }
        let tokens = OAuthTokens::from_callback(callback_url)?;

        let _guard = self.inner.op_lock.lock().await;
        let response = self
            .inner
            .provider
            .session_from_oauth(tokens)
            .await
            .map_err(|e| {
                warn!(error = %e, "OAuth sign-in failed");
                AuthError::from(e)
            })?;

        let session = response.data;
        self.establish(&session);
        self.inner
            .listener
            .notify(AuthStateChange::new(AuthEvent::SignedIn, Some(session.clone())));
        info!(email = %session.email, status = response.status, "OAuth sign-in successful");
        Ok(session)
    }

    // =========================================================================
    // Session state
    // =========================================================================

    /// Load the cached session at startup. Unreadable or expired caches
    /// leave the device logged out.
    pub fn restore(&self) -> Option<Session> {
        match self.inner.store.load_session() {
            Ok(Some(session)) if !session.is_expired() => {
                debug!(email = %session.email, "Session restored from cache");
                self.replace_current(Some(session.clone()));
                Some(session)
            }
            Ok(Some(session)) => {
                debug!(email = %session.email, "Cached session expired");
                if let Err(e) = self.inner.store.clear_session() {
                    warn!(error = %e, "Failed to clear expired session");
                }
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to load cached session");
                None
            }
        }
    }

    /// The cached session, if any. Never blocks on the network: when the
    /// session is close to expiry a background check is started and the
    /// stale session is still returned.
    pub fn current_session(&self) -> Option<Session> {
        let session = self.current()?;
        if session.needs_refresh() {
            self.spawn_refresh(session.clone());
        }
        Some(session)
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    /// Guard for protected screens.
    pub fn require_session(&self) -> Result<Session, AuthError> {
        self.current_session().ok_or(AuthError::Unauthorized)
    }

    pub async fn profile(&self) -> Result<Option<Profile>, AuthError> {
        let session = self.require_session()?;
        self.inner
            .provider
            .fetch_profile(&session)
            .await
            .map_err(AuthError::from)
    }

    /// Ask the provider whether the cached session is still good, adopting a
    /// refreshed token or dropping the session accordingly.
    pub async fn refresh(&self) {
        let Some(session) = self.current() else {
            return;
        };

        match self.inner.provider.get_session(&session).await {
            Ok(Some(fresh)) => {
                if fresh.token != session.token {
                    self.adopt_refreshed(&session.token, fresh);
                }
            }
            Ok(None) => self.expire_if_current(&session.token),
            Err(e) => warn!(error = %e, "Session refresh failed, keeping cached session"),
        }
    }

    /// Externally triggered `LoggedIn -> LoggedOut` transition. The
    /// remembered credential is kept so the login form can be pre-filled.
    pub fn expire_session(&self) {
        if let Some(session) = self.replace_current(None) {
            self.finish_expiry(&session);
        }
    }

    // =========================================================================
    // Remembered credential
    // =========================================================================

    /// Credential for pre-filling the login form. Storage failures degrade
    /// to `None`.
    pub fn remembered_credential(&self) -> Option<RememberedCredential> {
        self.inner.store.load_remembered().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load remembered credential");
            None
        })
    }

    pub fn forget_remembered(&self) -> Result<(), AuthError> {
        self.inner.store.forget()?;
        info!("Remembered credential cleared");
        Ok(())
    }

    // =========================================================================
    // Auth state changes
    // =========================================================================

    /// Register the process-wide auth-state listener. Fails with
    /// `ListenerActive` while another subscription is alive.
    pub fn on_auth_state_change(&self) -> Result<AuthSubscription, AuthError> {
        self.inner.listener.register()
    }

    /// Forward the provider's own auth-state stream into this service.
    ///
    /// The task holds only a weak reference and stops once the service is
    /// gone or the provider closes its stream.
    pub fn watch_provider(&self) -> JoinHandle<()> {
        let mut rx = self.inner.provider.subscribe();
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        SessionService { inner }.handle_provider_change(change);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Provider auth events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Provider watch finished");
        })
    }

    pub fn handle_provider_change(&self, change: AuthStateChange) {
        debug!(event = ?change.event, "Provider auth state change");
        match (change.event, change.session) {
            (AuthEvent::SessionExpired, Some(session)) => self.expire_if_current(&session.token),
            (AuthEvent::SessionExpired, None) => self.expire_session(),
            (AuthEvent::TokenRefreshed, Some(fresh)) => {
                if let Some(current) = self.current() {
                    if current.user_id == fresh.user_id && current.token != fresh.token {
                        self.adopt_refreshed(&current.token, fresh);
                    }
                }
            }
            _ => {}
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn current(&self) -> Option<Session> {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_current(&self, session: Option<Session>) -> Option<Session> {
        let mut current = self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, session)
    }

    /// Make `session` the current one and persist it.
    fn establish(&self, session: &Session) {
        self.replace_current(Some(session.clone()));
        if let Err(e) = self.inner.store.save_session(session) {
            warn!(error = %e, "Failed to persist session");
        }
    }

    /// Swap in a refreshed session, but only if `old_token` is still current.
    fn adopt_refreshed(&self, old_token: &str, fresh: Session) {
        {
            let mut current = self
                .inner
                .current
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if !current.as_ref().is_some_and(|s| s.token == old_token) {
                return;
            }
            *current = Some(fresh.clone());
        }

        if let Err(e) = self.inner.store.save_session(&fresh) {
            warn!(error = %e, "Failed to persist refreshed session");
        }
        debug!(email = %fresh.email, "Adopted refreshed session");
        self.inner
            .listener
            .notify(AuthStateChange::new(AuthEvent::TokenRefreshed, Some(fresh)));
    }

    fn expire_if_current(&self, token: &str) {
        let expired = {
            let mut current = self
                .inner
                .current
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if current.as_ref().is_some_and(|s| s.token == token) {
                current.take()
            } else {
                None
            }
        };

        if let Some(session) = expired {
            self.finish_expiry(&session);
        }
    }

    fn finish_expiry(&self, session: &Session) {
        info!(email = %session.email, "Session expired");
        if let Err(e) = self.inner.store.clear_session() {
            warn!(error = %e, "Failed to clear expired session");
        }
        self.inner
            .listener
            .notify(AuthStateChange::new(AuthEvent::SessionExpired, None));
    }

    fn spawn_refresh(&self, session: Session) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, skipping background refresh");
            return;
        };
        if self.inner.refreshing.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(email = %session.email, "Starting background session refresh");
        let service = self.clone();
        handle.spawn(async move {
            service.refresh().await;
            service.inner.refreshing.store(false, Ordering::SeqCst);
        });
    }
}
