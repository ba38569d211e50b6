//! Provider OAuth2 client.
//!
//! [`ProviderClient`] talks to the provider's authorization, token, and
//! userinfo endpoints: building the interactive login URL, exchanging an
//! authorization code, exchanging a refresh token, and fetching userinfo
//! for a live access token. Token and userinfo calls go through the bounded
//! retry policy in [`crate::retry`].
//!
//! The client secret is sent only as a form field to the token endpoint; it
//! never appears in logs or error messages.

use serde::Deserialize;
use url::Url;

use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::retry::RetryPolicy;

/// Tokens granted by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    /// The access token.
    pub access_token: String,

    /// Access token lifetime in seconds.
    pub expires_in: Option<u64>,

    /// Refresh token, granted only to programs enabled for it.
    pub refresh_token: Option<String>,

    /// Refresh token lifetime in seconds.
    pub refresh_token_expires_in: Option<u64>,

    /// Identity token (JWT), present when OpenID scopes were requested.
    pub id_token: Option<String>,

    /// Granted scopes.
    pub scope: Option<String>,
}

/// Response from the userinfo endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserinfoResponse {
    /// Subject identifier, the provider member id.
    pub sub: String,

    /// User's email address.
    pub email: Option<String>,

    /// Whether email is verified.
    pub email_verified: Option<bool>,

    /// User's full name.
    pub name: Option<String>,

    /// User's given name.
    pub given_name: Option<String>,

    /// User's family name.
    pub family_name: Option<String>,

    /// Profile picture URL.
    pub picture: Option<String>,
}

/// OAuth error body from the token endpoint.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// HTTP client for the provider's OAuth2 endpoints.
pub struct ProviderClient {
    config: ProviderConfig,
    http_client: reqwest::Client,
    retry: RetryPolicy,
}

impl ProviderClient {
    /// Creates a client for the configured provider.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            http_client,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the retry policy for token and userinfo calls.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the provider configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Builds the interactive login URL for the given anti-forgery state.
    #[must_use]
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.config.authorization_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", state)
            .append_pair("scope", &self.config.scopes);
        url
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnavailable` if the endpoint keeps failing or
    /// rejects the code. The error carries the provider's `error` /
    /// `error_description` fields when present, never the code or secret.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AuthError> {
        tracing::debug!(url = %self.config.token_url, "Exchanging authorization code");

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.config.redirect_uri),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ];

        self.token_request("code exchange", &params).await
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// As for [`exchange_code`](Self::exchange_code). The refresh
    /// orchestrator decides whether a failure means re-authentication.
    pub async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenGrant, AuthError> {
        tracing::debug!(url = %self.config.token_url, "Exchanging refresh token");

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ];

        self.token_request("refresh exchange", &params).await
    }

    /// Fetches userinfo for a live access token.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnavailable` on endpoint failure or an unparsable
    /// body.
    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<UserinfoResponse, AuthError> {
        let response = self
            .retry
            .send("userinfo", || {
                self.http_client
                    .get(self.config.userinfo_url.as_str())
                    .bearer_auth(access_token)
            })
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::upstream(format!(
                "userinfo endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::upstream(format!("failed to parse userinfo response: {e}")))
    }

    async fn token_request(
        &self,
        operation: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant, AuthError> {
        let response = self
            .retry
            .send(operation, || {
                self.http_client
                    .post(self.config.token_url.as_str())
                    .form(params)
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(&body) {
                return Err(AuthError::upstream(format!(
                    "{operation} rejected: {} ({})",
                    oauth_error.error,
                    oauth_error.error_description.unwrap_or_default()
                )));
            }

            return Err(AuthError::upstream(format!(
                "{operation} failed with HTTP {}",
                status.as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::upstream(format!("failed to parse token response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config(server: &MockServer) -> ProviderConfig {
        ProviderConfig::new("client-id", "client-secret", "https://app.example.com/callback")
            .with_token_url(Url::parse(&format!("{}/oauth/v2/accessToken", server.uri())).unwrap())
            .with_userinfo_url(Url::parse(&format!("{}/v2/userinfo", server.uri())).unwrap())
    }

    fn test_client(server: &MockServer) -> ProviderClient {
        ProviderClient::new(test_config(server))
            .with_retry_policy(RetryPolicy::default().with_backoff(Duration::ZERO))
    }

    fn grant_body() -> serde_json::Value {
        serde_json::json!({
            "access_token": "AQXdLV",
            "expires_in": 5184000,
            "refresh_token": "AQWrTV",
            "refresh_token_expires_in": 31536000,
            "id_token": "eyJ.header.sig",
            "scope": "openid profile email w_member_social",
        })
    }

    #[test]
    fn test_authorization_url() {
        let config =
            ProviderConfig::new("client-id", "client-secret", "https://app.example.com/callback");
        let client = ProviderClient::new(config);

        let url = client.authorization_url("state-abc");
        assert!(url.as_str().starts_with("https://www.linkedin.com/oauth/v2/authorization?"));

        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client-id");
        assert_eq!(pairs["redirect_uri"], "https://app.example.com/callback");
        assert_eq!(pairs["state"], "state-abc");
        assert_eq!(pairs["scope"], "openid profile email w_member_social");
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v2/accessToken"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code-1"))
            .and(body_string_contains("client_secret=client-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body()))
            .expect(1)
            .mount(&server)
            .await;

        let grant = test_client(&server).exchange_code("auth-code-1").await.unwrap();
        assert_eq!(grant.access_token, "AQXdLV");
        assert_eq!(grant.expires_in, Some(5_184_000));
        assert_eq!(grant.refresh_token.as_deref(), Some("AQWrTV"));
        assert!(grant.id_token.is_some());
    }

    #[tokio::test]
    async fn test_exchange_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v2/accessToken"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=AQWrTV"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "AQNewTok",
                "expires_in": 86400,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = test_client(&server)
            .exchange_refresh_token("AQWrTV")
            .await
            .unwrap();
        assert_eq!(grant.access_token, "AQNewTok");
        assert!(grant.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_rejected_code_reports_oauth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v2/accessToken"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "The authorization code expired",
            })))
            .mount(&server)
            .await;

        let err = test_client(&server).exchange_code("stale-code").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("invalid_grant"));
        // The code and secret never leak into the error.
        assert!(!message.contains("stale-code"));
        assert!(!message.contains("client-secret"));
    }

    #[tokio::test]
    async fn test_token_endpoint_retries_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v2/accessToken"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/v2/accessToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body()))
            .mount(&server)
            .await;

        let grant = test_client(&server).exchange_code("auth-code-1").await.unwrap();
        assert_eq!(grant.access_token, "AQXdLV");
    }

    #[tokio::test]
    async fn test_fetch_userinfo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "AbC123xyZ",
                "email": "member@example.com",
                "name": "Pat Member",
                "email_verified": true,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let userinfo = test_client(&server).fetch_userinfo("AQXdLV").await.unwrap();
        assert_eq!(userinfo.sub, "AbC123xyZ");
        assert_eq!(userinfo.email.as_deref(), Some("member@example.com"));
    }

    #[tokio::test]
    async fn test_userinfo_unauthorized_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/userinfo"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = test_client(&server).fetch_userinfo("revoked").await.unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable { .. }));
    }
}
