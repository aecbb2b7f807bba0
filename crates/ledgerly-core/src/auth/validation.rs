//! Pure form validation for the login and signup screens.
//!
//! Nothing here touches storage or the network, so every rule can be
//! exercised directly from a UI or a unit test.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Address syntax accepted by the login and signup forms.
static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

pub const MSG_EMAIL_REQUIRED: &str = "Enter your email";
pub const MSG_EMAIL_INVALID: &str = "Invalid email address";
pub const MSG_SECRET_REQUIRED: &str = "Enter your password";
pub const MSG_SECRET_MISMATCH: &str = "Passwords do not match";

pub fn validate_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

pub fn passwords_match(a: &str, b: &str) -> bool {
    a == b
}

/// Check a secret against the default policy.
pub fn validate_secret_policy(secret: &str) -> SecretChecks {
    SecretPolicy::default().check(secret)
}

/// Configurable password rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SecretPolicy {
    pub min_length: usize,
    pub require_upper: bool,
    pub require_symbol: bool,
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_upper: true,
            require_symbol: true,
        }
    }
}

impl SecretPolicy {
    /// Evaluate each rule separately. A rule the policy does not require
    /// always reports as met.
    pub fn check(&self, secret: &str) -> SecretChecks {
        SecretChecks {
            length: secret.chars().count() >= self.min_length,
            has_upper: !self.require_upper || secret.chars().any(|c| c.is_ascii_uppercase()),
            has_symbol: !self.require_symbol || secret.chars().any(is_symbol),
        }
    }
}

/// A symbol is anything outside `[A-Za-z0-9_]`.
fn is_symbol(c: char) -> bool {
    !(c.is_ascii_alphanumeric() || c == '_')
}

/// Per-rule outcome, so a UI can render a checklist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SecretChecks {
    pub length: bool,
    pub has_upper: bool,
    pub has_symbol: bool,
}

impl SecretChecks {
    pub fn is_satisfied(&self) -> bool {
        self.length && self.has_upper && self.has_symbol
    }

    /// Checklist rows as (label, met) pairs.
    pub fn checklist(&self, policy: &SecretPolicy) -> Vec<(String, bool)> {
        let mut rows = vec![(
            format!("At least {} characters", policy.min_length),
            self.length,
        )];
        if policy.require_upper {
            rows.push(("At least 1 uppercase letter".to_string(), self.has_upper));
        }
        if policy.require_symbol {
            rows.push(("At least 1 symbol".to_string(), self.has_symbol));
        }
        rows
    }
}

// ============================================================================
// Forms
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub email: String,
    pub secret: String,
    pub remember: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LoginErrors {
    pub email: Option<String>,
    pub secret: Option<String>,
    pub general: Option<String>,
}

impl LoginErrors {
    pub fn has_errors(&self) -> bool {
        self.email.is_some() || self.secret.is_some() || self.general.is_some()
    }
}

impl LoginForm {
    pub fn new(email: impl Into<String>, secret: impl Into<String>, remember: bool) -> Self {
        Self {
            email: email.into(),
            secret: secret.into(),
            remember,
        }
    }

    pub fn validate(&self) -> LoginErrors {
        let email = if self.email.is_empty() {
            Some(MSG_EMAIL_REQUIRED.to_string())
        } else if !validate_email(&self.email) {
            Some(MSG_EMAIL_INVALID.to_string())
        } else {
            None
        };

        let secret = self
            .secret
            .is_empty()
            .then(|| MSG_SECRET_REQUIRED.to_string());

        LoginErrors {
            email,
            secret,
            general: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub email: String,
    pub secret: String,
    pub confirm: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SignupErrors {
    pub email: Option<String>,
    pub confirm: Option<String>,
    pub general: Option<String>,
    pub checks: SecretChecks,
}

impl SignupErrors {
    pub fn has_errors(&self) -> bool {
        self.email.is_some()
            || self.confirm.is_some()
            || self.general.is_some()
            || !self.checks.is_satisfied()
    }
}

impl SignupForm {
    pub fn new(
        email: impl Into<String>,
        secret: impl Into<String>,
        confirm: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            secret: secret.into(),
            confirm: confirm.into(),
        }
    }

    pub fn validate(&self, policy: &SecretPolicy) -> SignupErrors {
        let email = if self.email.is_empty() {
            Some(MSG_EMAIL_REQUIRED.to_string())
        } else if !validate_email(&self.email) {
            Some(MSG_EMAIL_INVALID.to_string())
        } else {
            None
        };

        let confirm = (!passwords_match(&self.secret, &self.confirm))
            .then(|| MSG_SECRET_MISMATCH.to_string());

        SignupErrors {
            email,
            confirm,
            general: None,
            checks: policy.check(&self.secret),
        }
    }

    /// Mirrors the enabled state of the signup button.
    pub fn can_submit(&self, policy: &SecretPolicy) -> bool {
        !self.validate(policy).has_errors()
    }
}
