use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::SecretChecks;
use crate::provider::ProviderError;
use crate::store::StorageError;

/// Required form input named in a `MissingField` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Field {
    Email,
    Secret,
    /// Redirect URL pasted back after third-party sign-in.
    Callback,
}

impl Field {
    pub fn label(&self) -> &'static str {
        match self {
            Field::Email => "email",
            Field::Secret => "password",
            Field::Callback => "sign-in redirect URL",
        }
    }
}

/// Discriminant of an [`AuthError`], for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ErrorKind {
    InvalidFormat,
    WeakSecret,
    MissingField,
    AlreadyExists,
    Unauthorized,
    ProviderUnavailable,
    StorageFailure,
    ListenerActive,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email address")]
    InvalidFormat,

    #[error("Password does not meet the policy")]
    WeakSecret(SecretChecks),

    #[error("Missing required field: {}", .0.label())]
    MissingField(Field),

    #[error("An account with this email already exists")]
    AlreadyExists,

    #[error("Invalid email or password")]
    Unauthorized,

    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Local storage failure: {0}")]
    StorageFailure(#[from] StorageError),

    #[error("An auth state listener is already registered")]
    ListenerActive,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidFormat => ErrorKind::InvalidFormat,
            AuthError::WeakSecret(_) => ErrorKind::WeakSecret,
            AuthError::MissingField(_) => ErrorKind::MissingField,
            AuthError::AlreadyExists => ErrorKind::AlreadyExists,
            AuthError::Unauthorized => ErrorKind::Unauthorized,
            AuthError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            AuthError::StorageFailure(_) => ErrorKind::StorageFailure,
            AuthError::ListenerActive => ErrorKind::ListenerActive,
        }
    }

    /// HTTP-style status code, matching what the mock and hosted providers report.
    pub fn status(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidFormat | ErrorKind::WeakSecret | ErrorKind::MissingField => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::AlreadyExists | ErrorKind::ListenerActive => 409,
            ErrorKind::StorageFailure => 500,
            ErrorKind::ProviderUnavailable => 503,
        }
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unauthorized => AuthError::Unauthorized,
            ProviderError::AlreadyExists => AuthError::AlreadyExists,
            ProviderError::InvalidEmail => AuthError::InvalidFormat,
            ProviderError::WeakPassword(_) => AuthError::WeakSecret(SecretChecks::default()),
            other => AuthError::ProviderUnavailable(other.to_string()),
        }
    }
}
