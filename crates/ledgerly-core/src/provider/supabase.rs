//! Supabase GoTrue adapter.
//!
//! Talks to the hosted auth service over its REST API. Every request carries
//! the project's public `apikey`; calls on behalf of a user also carry the
//! session's bearer token.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use super::{
    AuthEvent, AuthStateChange, IdentityProvider, OAuthProvider, OAuthTokens, ProviderError,
    ProviderResponse, SignUp, EVENT_CHANNEL_CAPACITY,
};
use crate::auth::Session;
use crate::models::{Profile, User};

// ============================================================================
// Constants
// ============================================================================

/// Path prefix of the GoTrue endpoints
const AUTH_PATH: &str = "/auth/v1";

/// Path prefix of the PostgREST endpoints
const REST_PATH: &str = "/rest/v1";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Columns requested for the profile screen, including the joined address.
const PROFILE_COLUMNS: &str = "full_name,avatar_url,curp,gender,marital,email,medical_id,\
address:address(street,neighborhood,postal_code,city,state,phone)";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: GoTrueUser,
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl GoTrueUser {
    fn into_user(self, fallback_email: &str) -> User {
        User {
            id: self.id,
            email: self.email.unwrap_or_else(|| fallback_email.to_string()),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

impl TokenResponse {
    fn into_session(self, fallback_email: &str) -> Session {
        let user = self.user.into_user(fallback_email);
        let mut session = Session::new(&user, self.access_token);
        if let Some(refresh) = self.refresh_token {
            session = session.with_refresh_token(refresh);
        }
        if let Some(expires_in) = self.expires_in {
            session = session.with_expires_in(expires_in);
        }
        session
    }
}

/// Supabase client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct SupabaseProvider {
    client: Client,
    base_url: String,
    api_key: String,
    events: broadcast::Sender<AuthStateChange>,
}

impl SupabaseProvider {
    /// Create a new provider for the project at `base_url`
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            events,
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, AUTH_PATH, path)
    }

    fn with_api_key(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header(header::ACCEPT, "application/json")
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::from_status(status, &body))
        }
    }

    fn emit(&self, event: AuthEvent, session: Option<Session>) {
        // No receivers is fine; nobody is listening yet
        let _ = self.events.send(AuthStateChange::new(event, session));
    }

    async fn refresh(
        &self,
        session: &Session,
        refresh_token: &str,
    ) -> Result<Option<Session>, ProviderError> {
        let response = self
            .with_api_key(self.client.post(self.auth_url("/token")))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        match Self::check_response(response).await {
            Ok(response) => {
                let token: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                let refreshed = token.into_session(&session.email);
                debug!(email = %refreshed.email, "Session refreshed");
                self.emit(AuthEvent::TokenRefreshed, Some(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err(ProviderError::Unauthorized) => {
                self.emit(AuthEvent::SessionExpired, Some(session.clone()));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl IdentityProvider for SupabaseProvider {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        secret: &str,
    ) -> Result<ProviderResponse<Session>, ProviderError> {
        let response = self
            .with_api_key(self.client.post(self.auth_url("/token")))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": secret }))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let status = response.status().as_u16();
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(ProviderResponse::new(status, token.into_session(email)))
    }

    async fn sign_up(
        &self,
        email: &str,
        secret: &str,
    ) -> Result<ProviderResponse<SignUp>, ProviderError> {
        let response = self
            .with_api_key(self.client.post(self.auth_url("/signup")))
            .json(&json!({ "email": email, "password": secret }))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let status = response.status().as_u16();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        // With email confirmation on, GoTrue returns the bare user; with it
        // off, a full token response.
        let signup = if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            let session = token.into_session(email);
            SignUp {
                user: User {
                    id: session.user_id.clone(),
                    email: session.email.clone(),
                    created_at: session.created_at,
                },
                session: Some(session),
            }
        } else {
            let user: GoTrueUser = serde_json::from_value(body)
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            SignUp {
                user: user.into_user(email),
                session: None,
            }
        };

        Ok(ProviderResponse::new(status, signup))
    }

    async fn sign_out(&self, session: &Session) -> Result<(), ProviderError> {
        let response = self
            .with_api_key(self.client.post(self.auth_url("/logout")))
            .bearer_auth(&session.token)
            .send()
            .await?;

        match Self::check_response(response).await {
            Ok(_) => Ok(()),
            // Token already dead upstream; nothing left to revoke
            Err(ProviderError::Unauthorized) | Err(ProviderError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_session(&self, session: &Session) -> Result<Option<Session>, ProviderError> {
        if session.needs_refresh() {
            if let Some(ref refresh_token) = session.refresh_token {
                return self.refresh(session, refresh_token).await;
            }
        }

        let response = self
            .with_api_key(self.client.get(self.auth_url("/user")))
            .bearer_auth(&session.token)
            .send()
            .await?;

        match Self::check_response(response).await {
            Ok(_) => Ok(Some(session.clone())),
            Err(ProviderError::Unauthorized) | Err(ProviderError::AccessDenied(_)) => {
                warn!(email = %session.email, "Provider rejected cached session");
                self.emit(AuthEvent::SessionExpired, Some(session.clone()));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_profile(&self, session: &Session) -> Result<Option<Profile>, ProviderError> {
        let url = format!("{}{}/profiles", self.base_url, REST_PATH);
        let id_filter = format!("eq.{}", session.user_id);

        let response = self
            .with_api_key(self.client.get(&url))
            .bearer_auth(&session.token)
            .query(&[("id", id_filter.as_str()), ("select", PROFILE_COLUMNS)])
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let mut rows: Vec<Profile> = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    fn oauth_authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> Result<String, ProviderError> {
        let mut url = Url::parse(&self.auth_url("/authorize"))
            .map_err(|e| ProviderError::InvalidResponse(format!("Bad project URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to);
        Ok(url.to_string())
    }

    async fn session_from_oauth(
        &self,
        tokens: OAuthTokens,
    ) -> Result<ProviderResponse<Session>, ProviderError> {
        let response = self
            .with_api_key(self.client.get(self.auth_url("/user")))
            .bearer_auth(&tokens.access_token)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let status = response.status().as_u16();
        let user: GoTrueUser = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let session = TokenResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            user,
        }
        .into_session("");
        debug!(email = %session.email, "OAuth session resolved");
        Ok(ProviderResponse::new(status, session))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const API_KEY: &str = "anon-key";

    fn token_body(token: &str) -> Value {
        json!({
            "access_token": token,
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "user": {
                "id": "8d0f6c5e-2b1e-4c1a-9d3f-111111111111",
                "email": "kurizd@protonmail.com",
                "created_at": "2024-05-01T12:00:00Z"
            }
        })
    }

    fn session_for(server: &MockServer) -> (SupabaseProvider, Session) {
        let provider = SupabaseProvider::new(&server.uri(), API_KEY).unwrap();
        let user = User::new("8d0f6c5e-2b1e-4c1a-9d3f-111111111111", "kurizd@protonmail.com");
        let session = Session::new(&user, "access-1").with_expires_in(3600);
        (provider, session)
    }

    #[tokio::test]
    async fn test_sign_in_with_password() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", API_KEY))
            .and(body_json(json!({"email": "kurizd@protonmail.com", "password": "a"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-1")))
            .mount(&server)
            .await;

        let provider = SupabaseProvider::new(&format!("{}/", server.uri()), API_KEY).unwrap();
        let response = provider
            .sign_in_with_password("kurizd@protonmail.com", "a")
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.data.token, "access-1");
        assert_eq!(response.data.refresh_token.as_deref(), Some("refresh-1"));
        assert!(response.data.expires_at.is_some());
        assert_eq!(response.data.email, "kurizd@protonmail.com");
    }

    #[tokio::test]
    async fn test_sign_in_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let provider = SupabaseProvider::new(&server.uri(), API_KEY).unwrap();
        let err = provider
            .sign_in_with_password("kurizd@protonmail.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized));
    }

    #[tokio::test]
    async fn test_sign_up_pending_confirmation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "new-user-id",
                "email": "new@ledgerly.mx",
                "created_at": "2024-05-01T12:00:00Z",
                "confirmation_sent_at": "2024-05-01T12:00:00Z"
            })))
            .mount(&server)
            .await;

        let provider = SupabaseProvider::new(&server.uri(), API_KEY).unwrap();
        let response = provider.sign_up("new@ledgerly.mx", "Abcdefg!").await.unwrap();
        assert_eq!(response.data.user.id, "new-user-id");
        assert!(response.data.session.is_none());
    }

    #[tokio::test]
    async fn test_sign_up_auto_confirmed_returns_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-new")))
            .mount(&server)
            .await;

        let provider = SupabaseProvider::new(&server.uri(), API_KEY).unwrap();
        let response = provider
            .sign_up("kurizd@protonmail.com", "Abcdefg!")
            .await
            .unwrap();
        assert_eq!(
            response.data.session.map(|s| s.token).as_deref(),
            Some("access-new")
        );
    }

    #[tokio::test]
    async fn test_sign_up_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "code": 422,
                "error_code": "user_already_exists",
                "msg": "User already registered"
            })))
            .mount(&server)
            .await;

        let provider = SupabaseProvider::new(&server.uri(), API_KEY).unwrap();
        let err = provider.sign_up("a@b.com", "Abcdefg!").await.unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists));
    }

    #[test]
    fn test_oauth_authorize_url() {
        let provider = SupabaseProvider::new("https://abc.supabase.co/", API_KEY).unwrap();
        let url = provider
            .oauth_authorize_url(OAuthProvider::Google, "ledgerly://login-callback")
            .unwrap();
        assert_eq!(
            url,
            "https://abc.supabase.co/auth/v1/authorize?provider=google\
             &redirect_to=ledgerly%3A%2F%2Flogin-callback"
        );
    }

    #[tokio::test]
    async fn test_session_from_oauth_callback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("apikey", API_KEY))
            .and(header("authorization", "Bearer oauth-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "8d0f6c5e-2b1e-4c1a-9d3f-222222222222",
                "email": "kuri@gmail.com",
                "created_at": "2024-05-01T12:00:00Z"
            })))
            .mount(&server)
            .await;

        let provider = SupabaseProvider::new(&server.uri(), API_KEY).unwrap();
        let tokens = OAuthTokens::from_callback(
            "ledgerly://login-callback#access_token=oauth-access&refresh_token=r9&expires_in=3600",
        )
        .unwrap();
        let response = provider.session_from_oauth(tokens).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.data.email, "kuri@gmail.com");
        assert_eq!(response.data.user_id, "8d0f6c5e-2b1e-4c1a-9d3f-222222222222");
        assert_eq!(response.data.token, "oauth-access");
        assert_eq!(response.data.refresh_token.as_deref(), Some("r9"));
        assert!(response.data.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_session_from_oauth_rejected_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = SupabaseProvider::new(&server.uri(), API_KEY).unwrap();
        let tokens = OAuthTokens {
            access_token: "stale".to_string(),
            refresh_token: None,
            expires_in: None,
        };
        assert!(matches!(
            provider.session_from_oauth(tokens).await,
            Err(ProviderError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_get_session_rejected_emits_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (provider, session) = session_for(&server);
        let mut rx = provider.subscribe();
        assert!(provider.get_session(&session).await.unwrap().is_none());
        assert_eq!(rx.recv().await.unwrap().event, AuthEvent::SessionExpired);
    }

    #[tokio::test]
    async fn test_get_session_refreshes_when_near_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(body_json(json!({"refresh_token": "refresh-0"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-2")))
            .mount(&server)
            .await;

        let (provider, session) = session_for(&server);
        let expiring = session.with_refresh_token("refresh-0").with_expires_in(60);
        let mut rx = provider.subscribe();

        let refreshed = provider.get_session(&expiring).await.unwrap().unwrap();
        assert_eq!(refreshed.token, "access-2");
        assert_eq!(rx.recv().await.unwrap().event, AuthEvent::TokenRefreshed);
    }

    #[tokio::test]
    async fn test_sign_out_tolerates_dead_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (provider, session) = session_for(&server);
        assert!(provider.sign_out(&session).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", "eq.8d0f6c5e-2b1e-4c1a-9d3f-111111111111"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "full_name": "Kuri Zd",
                "email": "kurizd@protonmail.com",
                "address": { "city": "CDMX" }
            }])))
            .mount(&server)
            .await;

        let (provider, session) = session_for(&server);
        let profile = provider.fetch_profile(&session).await.unwrap().unwrap();
        assert_eq!(profile.display_name(), "Kuri Zd");
        assert_eq!(
            profile.address.and_then(|a| a.city).as_deref(),
            Some("CDMX")
        );
    }

    #[tokio::test]
    async fn test_server_error_maps_to_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let provider = SupabaseProvider::new(&server.uri(), API_KEY).unwrap();
        let err = provider
            .sign_in_with_password("a@b.com", "Abcdefg!")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ServerError(_)));
    }
}
