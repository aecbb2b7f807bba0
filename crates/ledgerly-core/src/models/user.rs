use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An account known to the identity provider.
///
/// The secret never appears here; only the provider holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub id: String,
    pub email: String,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            created_at: Utc::now(),
        }
    }

    /// Case-insensitive email comparison, the rule used for account lookups.
    pub fn has_email(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_email_ignores_case() {
        let user = User::new("1", "KuriZd@protonmaIL.com");
        assert!(user.has_email("kurizd@protonmail.com"));
        assert!(user.has_email("  KURIZD@PROTONMAIL.COM "));
        assert!(!user.has_email("kurizd@protonmail.org"));
    }
}
