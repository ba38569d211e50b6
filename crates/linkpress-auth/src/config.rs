//! Provider configuration.
//!
//! Configuration for the OAuth2/OIDC provider this backend consumes:
//! client credentials, callback URL, requested scopes, and the provider
//! endpoints. Endpoint defaults point at LinkedIn; every endpoint can be
//! overridden through the environment, which is how the test suite points
//! the subsystem at a mock server.

use std::time::Duration;

use url::Url;

use crate::error::AuthError;

/// Default authorization endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://www.linkedin.com/oauth/v2/authorization";

/// Default token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";

/// Default userinfo endpoint.
pub const DEFAULT_USERINFO_URL: &str = "https://api.linkedin.com/v2/userinfo";

/// Default signing key (JWKS) endpoint.
pub const DEFAULT_JWKS_URL: &str = "https://www.linkedin.com/oauth/openid/jwks";

/// Default requested scope string (OpenID scopes plus the member-post scope).
pub const DEFAULT_SCOPES: &str = "openid profile email w_member_social";

/// Which signal the identity resolver uses to obtain the remote subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Decode and verify the stored identity token's `sub` claim.
    /// Preferred: cryptographically verified, no extra round trip.
    VerifiedIdToken,
    /// Call the provider's userinfo endpoint with the live access credential.
    /// Fallback: reflects the current token owner at the cost of a network call.
    UserinfoCall,
}

impl IdentitySource {
    /// Parses an identity source from its configuration string.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the value is not `id_token` or `userinfo`.
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        match value {
            "id_token" => Ok(Self::VerifiedIdToken),
            "userinfo" => Ok(Self::UserinfoCall),
            other => Err(AuthError::configuration(format!(
                "IDENTITY_SOURCE must be 'id_token' or 'userinfo', got '{other}'"
            ))),
        }
    }
}

/// Configuration for the OAuth2/OIDC provider client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// OAuth client id.
    pub client_id: String,

    /// OAuth client secret. Never included in logs or error payloads.
    pub client_secret: String,

    /// Callback URL registered with the provider.
    pub redirect_uri: String,

    /// Space-separated scope string requested at login.
    pub scopes: String,

    /// Authorization endpoint (interactive login redirect target).
    pub authorization_url: Url,

    /// Token endpoint (code and refresh-token exchange).
    pub token_url: Url,

    /// Userinfo endpoint.
    pub userinfo_url: Url,

    /// Signing key set endpoint.
    pub jwks_url: Url,

    /// Which signal the identity resolver prefers.
    pub identity_source: IdentitySource,

    /// HTTP request timeout for provider calls (default: 30 seconds).
    pub request_timeout: Duration,
}

impl ProviderConfig {
    /// Creates a configuration with the default provider endpoints.
    ///
    /// # Panics
    ///
    /// Never panics: the default endpoint constants are valid URLs.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_SCOPES.to_string(),
            authorization_url: Url::parse(DEFAULT_AUTH_URL).expect("valid default URL"),
            token_url: Url::parse(DEFAULT_TOKEN_URL).expect("valid default URL"),
            userinfo_url: Url::parse(DEFAULT_USERINFO_URL).expect("valid default URL"),
            jwks_url: Url::parse(DEFAULT_JWKS_URL).expect("valid default URL"),
            identity_source: IdentitySource::VerifiedIdToken,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Loads configuration from the environment.
    ///
    /// Reads `PROVIDER_CLIENT_ID`, `PROVIDER_CLIENT_SECRET`,
    /// `PROVIDER_REDIRECT_URI`, `PROVIDER_SCOPES`, the endpoint override
    /// variables, and `IDENTITY_SOURCE`. Absent values fall back to defaults;
    /// validation of required values happens in [`validate`](Self::validate)
    /// so the failure is reported at the flow entry point.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if an endpoint override or `IDENTITY_SOURCE`
    /// value cannot be parsed.
    pub fn from_env() -> Result<Self, AuthError> {
        let mut config = Self::new(
            std::env::var("PROVIDER_CLIENT_ID").unwrap_or_default(),
            std::env::var("PROVIDER_CLIENT_SECRET").unwrap_or_default(),
            std::env::var("PROVIDER_REDIRECT_URI").unwrap_or_default(),
        );

        if let Ok(scopes) = std::env::var("PROVIDER_SCOPES") {
            config.scopes = scopes;
        }
        if let Ok(value) = std::env::var("PROVIDER_AUTH_URL") {
            config.authorization_url = parse_endpoint("PROVIDER_AUTH_URL", &value)?;
        }
        if let Ok(value) = std::env::var("PROVIDER_TOKEN_URL") {
            config.token_url = parse_endpoint("PROVIDER_TOKEN_URL", &value)?;
        }
        if let Ok(value) = std::env::var("PROVIDER_USERINFO_URL") {
            config.userinfo_url = parse_endpoint("PROVIDER_USERINFO_URL", &value)?;
        }
        if let Ok(value) = std::env::var("PROVIDER_JWKS_URL") {
            config.jwks_url = parse_endpoint("PROVIDER_JWKS_URL", &value)?;
        }
        if let Ok(value) = std::env::var("IDENTITY_SOURCE") {
            config.identity_source = IdentitySource::parse(&value)?;
        }

        Ok(config)
    }

    /// Validates that the required client settings are present.
    ///
    /// Called at the authorization-flow entry point so a misconfigured
    /// deployment fails before any state is issued or network call made.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` naming the first missing setting.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.is_empty() {
            return Err(AuthError::configuration("PROVIDER_CLIENT_ID is not set"));
        }
        if self.client_secret.is_empty() {
            return Err(AuthError::configuration("PROVIDER_CLIENT_SECRET is not set"));
        }
        if self.redirect_uri.is_empty() {
            return Err(AuthError::configuration("PROVIDER_REDIRECT_URI is not set"));
        }
        Ok(())
    }

    /// Sets the requested scope string.
    #[must_use]
    pub fn with_scopes(mut self, scopes: impl Into<String>) -> Self {
        self.scopes = scopes.into();
        self
    }

    /// Sets the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Sets the authorization endpoint.
    #[must_use]
    pub fn with_authorization_url(mut self, url: Url) -> Self {
        self.authorization_url = url;
        self
    }

    /// Sets the userinfo endpoint.
    #[must_use]
    pub fn with_userinfo_url(mut self, url: Url) -> Self {
        self.userinfo_url = url;
        self
    }

    /// Sets the signing key set endpoint.
    #[must_use]
    pub fn with_jwks_url(mut self, url: Url) -> Self {
        self.jwks_url = url;
        self
    }

    /// Sets the identity source the resolver prefers.
    #[must_use]
    pub fn with_identity_source(mut self, source: IdentitySource) -> Self {
        self.identity_source = source;
        self
    }

    /// Sets the HTTP request timeout for provider calls.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn parse_endpoint(name: &str, value: &str) -> Result<Url, AuthError> {
    Url::parse(value).map_err(|e| AuthError::configuration(format!("{name} is not a valid URL: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::new("id", "secret", "https://app.example.com/callback");
        assert_eq!(config.scopes, DEFAULT_SCOPES);
        assert_eq!(config.token_url.as_str(), DEFAULT_TOKEN_URL);
        assert_eq!(config.jwks_url.as_str(), DEFAULT_JWKS_URL);
        assert_eq!(config.identity_source, IdentitySource::VerifiedIdToken);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_first_missing_setting() {
        let config = ProviderConfig::new("", "", "");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PROVIDER_CLIENT_ID"));

        let config = ProviderConfig::new("id", "", "");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PROVIDER_CLIENT_SECRET"));

        let config = ProviderConfig::new("id", "secret", "");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PROVIDER_REDIRECT_URI"));
    }

    #[test]
    fn test_identity_source_parse() {
        assert_eq!(
            IdentitySource::parse("id_token").unwrap(),
            IdentitySource::VerifiedIdToken
        );
        assert_eq!(
            IdentitySource::parse("userinfo").unwrap(),
            IdentitySource::UserinfoCall
        );
        assert!(IdentitySource::parse("database").is_err());
    }

    #[test]
    fn test_builder() {
        let token_url = Url::parse("http://127.0.0.1:9999/token").unwrap();
        let config = ProviderConfig::new("id", "secret", "http://localhost/cb")
            .with_scopes("openid")
            .with_token_url(token_url.clone())
            .with_identity_source(IdentitySource::UserinfoCall)
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.scopes, "openid");
        assert_eq!(config.token_url, token_url);
        assert_eq!(config.identity_source, IdentitySource::UserinfoCall);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
