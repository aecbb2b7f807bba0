//! Third-party sign-in (Google, Apple) through the provider's OAuth redirect.
//!
//! The provider hands out an authorize URL, the user finishes sign-in in a
//! browser, and the redirect target receives the tokens in its fragment
//! (`#access_token=..&refresh_token=..&expires_in=..`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use super::ProviderError;

/// Redirect target registered for the app's deep link
pub const DEFAULT_REDIRECT: &str = "ledgerly://login-callback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum OAuthProvider {
    Google,
    Apple,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Apple => "apple",
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "apple" => Ok(OAuthProvider::Apple),
            other => Err(ProviderError::Unsupported(format!("OAuth provider '{}'", other))),
        }
    }
}

/// Tokens delivered on the OAuth redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl OAuthTokens {
    /// Read the tokens from the URL the browser was redirected to. The
    /// implicit flow puts them in the fragment; some servers use the query.
    ///
    /// A redirect carrying `error` (the user cancelled, or the provider
    /// refused) is reported as `Unauthorized`.
    pub fn from_callback(callback: &str) -> Result<Self, ProviderError> {
        let url = Url::parse(callback.trim())
            .map_err(|e| ProviderError::InvalidResponse(format!("Bad callback URL: {}", e)))?;

        let mut pairs: Vec<(String, String)> = url
            .fragment()
            .map(|f| url::form_urlencoded::parse(f.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        pairs.extend(url.query_pairs().into_owned());
        let param = |name: &str| {
            pairs
                .iter()
                .find(|(k, v)| k == name && !v.is_empty())
                .map(|(_, v)| v.clone())
        };

        if let Some(error) = param("error") {
            let description = param("error_description").unwrap_or_default();
            warn!(error = %error, description = %description, "OAuth sign-in refused");
            return Err(ProviderError::Unauthorized);
        }

        let access_token = param("access_token").ok_or_else(|| {
            ProviderError::InvalidResponse("Callback carries no access token".to_string())
        })?;

        Ok(Self {
            access_token,
            refresh_token: param("refresh_token"),
            expires_in: param("expires_in").and_then(|v| v.parse().ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_from_fragment() {
        let tokens = OAuthTokens::from_callback(
            "ledgerly://login-callback#access_token=abc.def&expires_in=3600\
             &refresh_token=r1&token_type=bearer",
        )
        .unwrap();
        assert_eq!(tokens.access_token, "abc.def");
        assert_eq!(tokens.refresh_token.as_deref(), Some("r1"));
        assert_eq!(tokens.expires_in, Some(3600));
    }

    #[test]
    fn test_tokens_from_query() {
        let tokens =
            OAuthTokens::from_callback("https://app.ledgerly.mx/cb?access_token=a%2Bb").unwrap();
        assert_eq!(tokens.access_token, "a+b");
        assert!(tokens.refresh_token.is_none());
        assert!(tokens.expires_in.is_none());
    }

    #[test]
    fn test_cancelled_sign_in_is_unauthorized() {
        let err = OAuthTokens::from_callback(
            "ledgerly://login-callback#error=access_denied&error_description=User+cancelled",
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized));
    }

    #[test]
    fn test_callback_without_token_is_invalid() {
        assert!(matches!(
            OAuthTokens::from_callback("ledgerly://login-callback#token_type=bearer"),
            Err(ProviderError::InvalidResponse(_))
        ));
        assert!(matches!(
            OAuthTokens::from_callback("not a url"),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_provider_names() {
        assert_eq!("Google".parse::<OAuthProvider>().unwrap(), OAuthProvider::Google);
        assert_eq!(OAuthProvider::Apple.as_str(), "apple");
        assert!(matches!(
            "github".parse::<OAuthProvider>(),
            Err(ProviderError::Unsupported(_))
        ));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let tokens = OAuthTokens {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_in: None,
        };
        let debug = format!("{:?}", tokens);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }
}
