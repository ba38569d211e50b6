//! Access credential refresh orchestration.
//!
//! [`RefreshOrchestrator`] decides, per request, whether a user's stored
//! access token can be served as-is, must be refreshed, or requires a new
//! interactive login:
//!
//! - no credential row: `NoCredential`
//! - token outside the expiry window: served as-is
//! - token expiring with no refresh token on file: `ReauthRequired`
//! - token expiring with a refresh token: one refresh exchange; on success
//!   the row is updated in place, on failure `ReauthRequired`
//!
//! A failed refresh exchange is never papered over with the old token: the
//! provider has spoken, and the user redoes the login flow.

use std::fmt;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::credentials::CredentialManager;
use crate::error::AuthError;
use crate::provider::ProviderClient;
use crate::storage::DEFAULT_EXPIRY_SKEW;

/// A usable access token, possibly just refreshed.
#[derive(Clone)]
pub struct FreshAccess {
    /// Plaintext access token.
    pub access_token: String,

    /// Expiry of the token being served.
    pub expires_at: Option<OffsetDateTime>,

    /// Whether a refresh exchange happened on this call.
    pub refreshed: bool,
}

impl fmt::Debug for FreshAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreshAccess")
            .field("access_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("refreshed", &self.refreshed)
            .finish()
    }
}

/// Serves fresh access tokens, refreshing expiring ones.
pub struct RefreshOrchestrator {
    credentials: Arc<CredentialManager>,
    provider: Arc<ProviderClient>,
    /// Tokens within this window of expiry are refreshed preemptively.
    expiry_skew: Duration,
}

impl RefreshOrchestrator {
    /// Creates an orchestrator with the default 5-minute expiry skew.
    #[must_use]
    pub fn new(credentials: Arc<CredentialManager>, provider: Arc<ProviderClient>) -> Self {
        Self {
            credentials,
            provider,
            expiry_skew: DEFAULT_EXPIRY_SKEW,
        }
    }

    /// Sets the expiry skew window.
    #[must_use]
    pub fn with_expiry_skew(mut self, skew: Duration) -> Self {
        self.expiry_skew = skew;
        self
    }

    /// Returns a usable access token for the user.
    ///
    /// # Errors
    ///
    /// - `NoCredential` if the user has never completed a login.
    /// - `ReauthRequired` if the token is expiring and cannot be refreshed,
    ///   or the refresh exchange failed.
    /// - `CorruptCredential` / `Storage` from the layers below.
    pub async fn ensure_fresh(&self, user_id: i64) -> Result<FreshAccess, AuthError> {
        let credentials = self
            .credentials
            .latest(user_id)
            .await?
            .ok_or(AuthError::NoCredential { user_id })?;

        let now = OffsetDateTime::now_utc();
        if !credentials.is_expiring_at(now, self.expiry_skew) {
            return Ok(FreshAccess {
                access_token: credentials.access_token,
                expires_at: credentials.expires_at,
                refreshed: false,
            });
        }

        let Some(refresh_token) = credentials.refresh_token.as_deref() else {
            tracing::info!(user_id, "Access credential expiring with no refresh token");
            return Err(AuthError::reauth_required(
                "access token is expiring and no refresh token is on file",
            ));
        };

        tracing::info!(user_id, record_id = credentials.record_id, "Refreshing access credential");

        let grant = self
            .provider
            .exchange_refresh_token(refresh_token)
            .await
            .map_err(|e| {
                tracing::warn!(user_id, error = %e, "Refresh exchange failed");
                AuthError::reauth_required(format!("refresh exchange failed: {e}"))
            })?;

        let expires_at = self
            .credentials
            .update_access(credentials.record_id, &grant.access_token, grant.expires_in)
            .await?;

        Ok(FreshAccess {
            access_token: grant.access_token,
            expires_at,
            refreshed: true,
        })
    }
}
