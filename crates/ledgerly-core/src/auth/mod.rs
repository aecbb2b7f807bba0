//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `SessionService`: the single source of truth for who is signed in
//! - `CredentialStore`: persisted session and remembered login
//! - `AuthFlowController`: form handling and routing for the auth screens
//! - `validation`: email and password rules shared by forms and service
//!
//! Sessions survive restarts through the credential store. Tokens issued by
//! a hosted provider are refreshed in the background before they expire.

pub mod credentials;
pub mod flow;
mod listener;
pub mod service;
pub mod session;
pub mod validation;

pub use credentials::{CredentialStore, RememberedCredential};
pub use flow::{message_for, AuthFlowController, LoginOutcome, Route, ScreenHandle, SignupOutcome};
pub use listener::AuthSubscription;
pub use service::{SessionService, SessionSettings};
pub use session::Session;
pub use validation::{
    LoginErrors, LoginForm, SecretChecks, SecretPolicy, SignupErrors, SignupForm,
};
