//! Identity token verification.
//!
//! [`IdTokenVerifier`] verifies provider-issued identity tokens: signature
//! against the cached signing key set, issuer against the known issuer
//! variants, and audience against the configured client id.
//!
//! # Verification Steps
//!
//! 1. Decode the header; a missing `kid` is a malformed token.
//! 2. Reject symmetric algorithms outright, so a token claiming `HS256`
//!    can never be verified against a public key treated as a shared secret.
//! 3. Look the `kid` up in the cached key set; if absent, force exactly one
//!    key refresh and retry the lookup before failing with
//!    `UnknownSigningKey`.
//! 4. Verify the signature and expiry, then check issuer and audience.
//!
//! Expiry and issuer checks can be bypassed per call for diagnostic
//! decoding. Callers that gate a credential use or an outbound write keep
//! both enforced; an expired token fails with `TokenExpired` so they can
//! fall back to a live identity lookup instead.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode_header};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::jwks::{KeyRingCache, find_key};

/// Issuer values accepted on identity tokens.
///
/// The provider has historically issued tokens under both the bare host and
/// the `/oauth` path, with and without a trailing slash. All four are
/// equivalent.
pub const ISSUER_ALLOWLIST: [&str; 4] = [
    "https://www.linkedin.com",
    "https://www.linkedin.com/",
    "https://www.linkedin.com/oauth",
    "https://www.linkedin.com/oauth/",
];

/// Algorithms the verifier will accept. Asymmetric signature schemes only.
const ALLOWED_ALGORITHMS: [Algorithm; 9] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::EdDSA,
];

/// Claims extracted from a verified identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer identifier.
    pub iss: String,

    /// Subject identifier. For this provider, the member id.
    pub sub: String,

    /// Audience (can be string or array, handled by serde).
    #[serde(deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at time (Unix timestamp).
    pub iat: Option<i64>,

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

    /// User's locale.
    pub locale: Option<serde_json::Value>,

    /// Profile picture URL.
    pub picture: Option<String>,
}

/// Per-call verification options.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Audience the token must be intended for (the OAuth client id).
    /// When `None`, the audience check is skipped.
    pub expected_audience: Option<String>,

    /// Skip the expiry check. The signature check still applies.
    pub allow_expired: bool,

    /// Skip the issuer allow-list check.
    pub allow_any_issuer: bool,
}

impl VerifyOptions {
    /// Requires the token's audience to contain the given client id.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    /// Accepts expired tokens.
    #[must_use]
    pub fn with_allow_expired(mut self, allow: bool) -> Self {
        self.allow_expired = allow;
        self
    }

    /// Accepts any issuer.
    #[must_use]
    pub fn with_allow_any_issuer(mut self, allow: bool) -> Self {
        self.allow_any_issuer = allow;
        self
    }
}

/// Verifies identity tokens against the provider's signing keys.
pub struct IdTokenVerifier {
    key_ring: Arc<KeyRingCache>,
    /// Clock skew tolerance for expiry checks (default: 60 seconds).
    clock_skew_tolerance: Duration,
}

impl IdTokenVerifier {
    /// Creates a verifier backed by the given key ring cache.
    #[must_use]
    pub fn new(key_ring: Arc<KeyRingCache>) -> Self {
        Self {
            key_ring,
            clock_skew_tolerance: Duration::from_secs(60),
        }
    }

    /// Sets the clock skew tolerance.
    #[must_use]
    pub fn with_clock_skew_tolerance(mut self, tolerance: Duration) -> Self {
        self.clock_skew_tolerance = tolerance;
        self
    }

    /// Verifies an identity token and returns its claims.
    ///
    /// # Errors
    ///
    /// - `MalformedToken` if the token cannot be parsed or has no `kid`.
    /// - `SignatureInvalid` if the algorithm is symmetric or the signature
    ///   does not verify.
    /// - `TokenExpired` if `exp` is in the past (unless bypassed).
    /// - `UnknownSigningKey` if the `kid` is absent even after a forced
    ///   key refresh.
    /// - `InvalidIssuer` / `InvalidAudience` on claim mismatches.
    /// - `UpstreamUnavailable` if keys could not be fetched at all.
    pub async fn verify(
        &self,
        token: &str,
        options: &VerifyOptions,
    ) -> Result<IdTokenClaims, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::malformed_token(format!("undecodable header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::malformed_token("token header has no kid"))?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::signature_invalid(format!(
                "token algorithm {:?} is not an accepted asymmetric algorithm",
                header.alg
            )));
        }

        // Look the key up in the cached set; on a miss, force one refresh
        // in case the provider rotated keys since the last fetch.
        let keys = self.key_ring.get_keys().await?;
        let found = match find_key(&keys, &kid) {
            Some(found) => found,
            None => {
                let keys = self.key_ring.refresh().await?;
                find_key(&keys, &kid)
                    .ok_or_else(|| AuthError::UnknownSigningKey { kid: kid.clone() })?
            }
        };
        let (decoding_key, key_alg) = found;

        let alg = key_alg.unwrap_or(header.alg);
        let mut validation = Validation::new(alg);
        validation.leeway = self.clock_skew_tolerance.as_secs();
        validation.validate_exp = !options.allow_expired;
        // Issuer and audience are checked against the decoded claims below:
        // the issuer allow-list has path/slash variants `Validation` cannot
        // express, and the audience failure must name the value found.
        validation.validate_aud = false;

        let token_data = jsonwebtoken::decode::<IdTokenClaims>(token, &decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::token_expired("token exp is in the past"),
                ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                    AuthError::malformed_token(format!("undecodable token: {e}"))
                }
                _ => AuthError::signature_invalid(format!("verification failed: {e}")),
            })?;
        let claims = token_data.claims;

        if !options.allow_any_issuer && !ISSUER_ALLOWLIST.contains(&claims.iss.as_str()) {
            return Err(AuthError::InvalidIssuer {
                issuer: claims.iss.clone(),
            });
        }

        if let Some(expected) = &options.expected_audience
            && !claims.aud.iter().any(|aud| aud == expected)
        {
            return Err(AuthError::InvalidAudience {
                expected: expected.clone(),
                found: claims.aud.join(", "),
            });
        }

        tracing::debug!(sub = %claims.sub, iss = %claims.iss, "Verified identity token");

        Ok(claims)
    }
}

fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}
