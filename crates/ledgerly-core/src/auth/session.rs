use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::User;

/// Buffer time before expiry to trigger refresh (5 minutes)
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// Runtime proof that a user is authenticated on this device.
///
/// The tokens are opaque; nothing here interprets them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    pub fn new(user: &User, token: impl Into<String>) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            token: token.into(),
            refresh_token: None,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Mint a session with a fresh random token, as the mock provider does.
    pub fn mint(user: &User, prefix: &str) -> Self {
        Self::new(user, format!("{}{}", prefix, Uuid::new_v4().simple()))
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_in(mut self, seconds: i64) -> Self {
        self.expires_at = Some(self.created_at + Duration::seconds(seconds));
        self
    }

    /// A session without an expiry never expires locally.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Utc::now() > at).unwrap_or(false)
    }

    /// Check if the session will expire soon and should be refreshed
    pub fn needs_refresh(&self) -> bool {
        self.expires_at
            .map(|at| Utc::now() > at - Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES))
            .unwrap_or(false)
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at.map(|at| at - Utc::now())
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.time_until_expiry().map(|d| d.num_minutes().max(0))
    }
}
