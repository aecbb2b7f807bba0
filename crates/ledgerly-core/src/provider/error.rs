use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid login credentials")]
    Unauthorized,

    #[error("User already registered")]
    AlreadyExists,

    #[error("Email address is not valid")]
    InvalidEmail,

    #[error("Password rejected by provider: {0}")]
    WeakPassword(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not supported by this provider: {0}")]
    Unsupported(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// GoTrue error bodies come in two shapes depending on the server version.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

impl ErrorBody {
    fn message(&self) -> Option<&str> {
        self.msg
            .as_deref()
            .or(self.error_description.as_deref())
            .or(self.error.as_deref())
    }

    /// Lowercased code and message, for keyword matching.
    fn haystack(&self) -> String {
        [
            self.error.as_deref(),
            self.error_code.as_deref(),
            self.error_description.as_deref(),
            self.msg.as_deref(),
        ]
        .iter()
        .flatten()
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

impl ProviderError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let haystack = parsed.haystack();
        let detail = parsed
            .message()
            .map(Self::truncate_body)
            .unwrap_or_else(|| Self::truncate_body(body));

        match status.as_u16() {
            401 => ProviderError::Unauthorized,
            400 | 422
                if haystack.contains("invalid_grant")
                    || haystack.contains("invalid_credentials")
                    || haystack.contains("invalid login credentials") =>
            {
                ProviderError::Unauthorized
            }
            400 | 422
                if haystack.contains("already registered")
                    || haystack.contains("user_already_exists")
                    || haystack.contains("email_exists") =>
            {
                ProviderError::AlreadyExists
            }
            400 | 422 if haystack.contains("weak_password") => ProviderError::WeakPassword(detail),
            400 | 422
                if haystack.contains("email_address_invalid")
                    || haystack.contains("validate email") =>
            {
                ProviderError::InvalidEmail
            }
            403 => ProviderError::AccessDenied(detail),
            404 => ProviderError::NotFound(detail),
            409 => ProviderError::AlreadyExists,
            429 => ProviderError::RateLimited,
            500..=599 => ProviderError::ServerError(detail),
            _ => ProviderError::InvalidResponse(format!("Status {}: {}", status, detail)),
        }
    }

    /// HTTP-style status this error corresponds to.
    pub fn status(&self) -> u16 {
        match self {
            ProviderError::Unauthorized => 401,
            ProviderError::AlreadyExists => 409,
            ProviderError::InvalidEmail | ProviderError::WeakPassword(_) => 400,
            ProviderError::AccessDenied(_) => 403,
            ProviderError::NotFound(_) => 404,
            ProviderError::RateLimited => 429,
            ProviderError::ServerError(_) => 500,
            ProviderError::Unsupported(_) => 501,
            ProviderError::NetworkError(_) | ProviderError::InvalidResponse(_) => 503,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_invalid_credentials() {
        let legacy = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_REQUEST, legacy),
            ProviderError::Unauthorized
        ));

        let current = r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#;
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_REQUEST, current),
            ProviderError::Unauthorized
        ));
    }

    #[test]
    fn test_from_status_already_registered() {
        let body = r#"{"code":422,"error_code":"user_already_exists","msg":"User already registered"}"#;
        assert!(matches!(
            ProviderError::from_status(StatusCode::UNPROCESSABLE_ENTITY, body),
            ProviderError::AlreadyExists
        ));
    }

    #[test]
    fn test_from_status_weak_password_keeps_message() {
        let body = r#"{"code":422,"error_code":"weak_password","msg":"Password should be at least 6 characters"}"#;
        match ProviderError::from_status(StatusCode::UNPROCESSABLE_ENTITY, body) {
            ProviderError::WeakPassword(msg) => {
                assert_eq!(msg, "Password should be at least 6 characters")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_from_status_generic_codes() {
        assert!(matches!(
            ProviderError::from_status(StatusCode::UNAUTHORIZED, ""),
            ProviderError::Unauthorized
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            ProviderError::ServerError(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::IM_A_TEAPOT, "?"),
            ProviderError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(600);
        let truncated = ProviderError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.contains("600 total bytes"));

        let multibyte = "é".repeat(300);
        assert!(ProviderError::truncate_body(&multibyte).contains("truncated"));
    }
}
