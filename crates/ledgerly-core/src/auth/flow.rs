//! Auth flow controller: the glue between screens and the session service.
//!
//! Screens hand over raw form input and receive either a session or a set of
//! field-level errors. Service calls run on their own task, so leaving a
//! screen mid-request never cancels a half-finished login; the result is
//! simply discarded once the screen is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error};

use crate::auth::credentials::RememberedCredential;
use crate::auth::validation::{
    LoginErrors, LoginForm, SignupErrors, SignupForm, MSG_EMAIL_INVALID, MSG_EMAIL_REQUIRED,
    MSG_SECRET_REQUIRED,
};
use crate::auth::{Session, SessionService};
use crate::error::{AuthError, Field};
use crate::models::User;
use crate::provider::oauth::DEFAULT_REDIRECT;
use crate::provider::{AuthEvent, AuthStateChange, OAuthProvider};

/// Top-level destinations the auth flow can send a user to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Route {
    Login,
    Signup,
    Main,
}

/// User-facing text for each error kind.
pub fn message_for(err: &AuthError) -> String {
    match err {
        AuthError::InvalidFormat => MSG_EMAIL_INVALID.to_string(),
        AuthError::WeakSecret(_) => "Password does not meet the requirements".to_string(),
        AuthError::MissingField(Field::Email) => MSG_EMAIL_REQUIRED.to_string(),
        AuthError::MissingField(Field::Secret) => MSG_SECRET_REQUIRED.to_string(),
        AuthError::MissingField(Field::Callback) => {
            "Paste the address the browser opened after signing in".to_string()
        }
        AuthError::AlreadyExists => "This email is already registered".to_string(),
        AuthError::Unauthorized => "Invalid email or password".to_string(),
        AuthError::ProviderUnavailable(_) => {
            "Unable to connect to server. Check your internet connection.".to_string()
        }
        AuthError::StorageFailure(_) => {
            "Could not access secure storage on this device".to_string()
        }
        AuthError::ListenerActive => {
            "Another screen is already listening for sign-in changes".to_string()
        }
    }
}

#[derive(Debug)]
pub enum LoginOutcome {
    LoggedIn(Session),
    Rejected(LoginErrors),
}

#[derive(Debug)]
pub enum SignupOutcome {
    /// Account created. `signed_in` is false while verification is pending.
    Registered { user: User, signed_in: bool },
    Rejected(SignupErrors),
}

/// Marks a screen as mounted. Results for an unmounted screen are dropped.
#[derive(Debug, Clone)]
pub struct ScreenHandle {
    mounted: Arc<AtomicBool>,
}

impl ScreenHandle {
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Navigate away from the screen.
    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }
}

pub struct AuthFlowController {
    service: SessionService,
}

impl AuthFlowController {
    pub fn new(service: SessionService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &SessionService {
        &self.service
    }

    pub fn mount(&self) -> ScreenHandle {
        ScreenHandle {
            mounted: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn initial_route(&self) -> Route {
        if self.service.current_session().is_some() {
            Route::Main
        } else {
            Route::Login
        }
    }

    /// Login form pre-filled from the remembered credential, if there is one.
    pub fn prefill(&self) -> LoginForm {
        match self.service.remembered_credential() {
            Some(RememberedCredential { email, secret }) => LoginForm::new(email, secret, true),
            None => LoginForm::default(),
        }
    }

    pub async fn login(&self, screen: &ScreenHandle, form: LoginForm) -> Option<LoginOutcome> {
        let errors = form.validate();
        if errors.has_errors() {
            return screen.is_mounted().then_some(LoginOutcome::Rejected(errors));
        }

        let service = self.service.clone();
        let task = tokio::spawn(async move {
            service
                .login(&form.email, &form.secret, form.remember)
                .await
        });
        let result = task.await.unwrap_or_else(|e| {
            error!(error = %e, "Login task failed");
            Err(AuthError::ProviderUnavailable(e.to_string()))
        });

        if !screen.is_mounted() {
            debug!("Discarding login result for unmounted screen");
            return None;
        }

        Some(match result {
            Ok(session) => LoginOutcome::LoggedIn(session),
            Err(e) => LoginOutcome::Rejected(login_errors_for(&e)),
        })
    }

    pub async fn signup(&self, screen: &ScreenHandle, form: SignupForm) -> Option<SignupOutcome> {
        let policy = self.service.settings().policy;
        let errors = form.validate(&policy);
        if errors.has_errors() {
            return screen.is_mounted().then_some(SignupOutcome::Rejected(errors));
        }

        let service = self.service.clone();
        let task = tokio::spawn(async move { service.signup(&form.email, &form.secret).await });
        let result = task.await.unwrap_or_else(|e| {
            error!(error = %e, "Signup task failed");
            Err(AuthError::ProviderUnavailable(e.to_string()))
        });

        if !screen.is_mounted() {
            debug!("Discarding signup result for unmounted screen");
            return None;
        }

        Some(match result {
            Ok(user) => {
                let signed_in = self
                    .service
                    .current_session()
                    .is_some_and(|s| s.user_id == user.id);
                SignupOutcome::Registered { user, signed_in }
            }
            Err(e) => {
                let mut rejected = SignupErrors {
                    checks: errors.checks,
                    ..Default::default()
                };
                match e {
                    AuthError::InvalidFormat => rejected.email = Some(message_for(&e)),
                    AuthError::WeakSecret(checks) => {
                        rejected.general = Some(message_for(&e));
                        rejected.checks = checks;
                    }
                    other => rejected.general = Some(message_for(&other)),
                }
                SignupOutcome::Rejected(rejected)
            }
        })
    }

    /// Browser URL for a "Continue with Google/Apple" button. The redirect
    /// comes back to the app's deep link.
    pub fn oauth_url(&self, provider: OAuthProvider) -> Result<String, AuthError> {
        self.service.oauth_url(provider, DEFAULT_REDIRECT)
    }

    /// Finish third-party sign-in from the deep link the browser opened.
    pub async fn complete_oauth(
        &self,
        screen: &ScreenHandle,
        callback_url: String,
    ) -> Option<LoginOutcome> {
        let service = self.service.clone();
        let task = tokio::spawn(async move { service.complete_oauth(&callback_url).await });
        let result = task.await.unwrap_or_else(|e| {
            error!(error = %e, "OAuth task failed");
            Err(AuthError::ProviderUnavailable(e.to_string()))
        });

        if !screen.is_mounted() {
            debug!("Discarding OAuth result for unmounted screen");
            return None;
        }

        Some(match result {
            Ok(session) => LoginOutcome::LoggedIn(session),
            Err(e) => LoginOutcome::Rejected(LoginErrors {
                general: Some(message_for(&e)),
                ..Default::default()
            }),
        })
    }

    pub async fn logout(&self) -> Route {
        self.service.logout().await;
        Route::Login
    }

    /// Where a screen should go after an auth state change.
    pub fn route_for(change: &AuthStateChange) -> Option<Route> {
        match change.event {
            AuthEvent::SignedIn => Some(Route::Main),
            AuthEvent::SignedOut | AuthEvent::SessionExpired => Some(Route::Login),
            AuthEvent::TokenRefreshed => None,
        }
    }
}

fn login_errors_for(err: &AuthError) -> LoginErrors {
    let message = Some(message_for(err));
    match err {
        AuthError::InvalidFormat | AuthError::MissingField(Field::Email) => LoginErrors {
            email: message,
            ..Default::default()
        },
        AuthError::MissingField(Field::Secret) => LoginErrors {
            secret: message,
            ..Default::default()
        },
        _ => LoginErrors {
            general: message,
            ..Default::default()
        },
    }
}
