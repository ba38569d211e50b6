//! Author identity resolution.
//!
//! Before posting on a user's behalf, the subsystem must decide which
//! remote identity the post is authored as. [`IdentityResolver`] obtains
//! the remote subject identifier from the configured source, checks it
//! against the identifier persisted for the local user, and fails closed
//! on any disagreement.
//!
//! The mismatch rule is the hard invariant of this module: once a
//! `member_id` is persisted for a user, a resolution that produces a
//! different identifier is a conflict. It is never resolved silently,
//! because a stale mapping from a previous login by a different remote
//! account would otherwise cause posts under the wrong identity.
//!
//! Member ids and numeric person ids are distinct identifier spaces. The
//! resolver works in member ids; person ids are captured separately via
//! [`IdentityResolver::record_person_id`] and never derived from a subject
//! identifier.

use std::sync::Arc;

use crate::config::IdentitySource;
use crate::credentials::CredentialManager;
use crate::error::AuthError;
use crate::provider::ProviderClient;
use crate::storage::UserStore;
use crate::verifier::{IdTokenVerifier, VerifyOptions};

/// Builds the author reference for a member id.
#[must_use]
pub fn member_urn(member_id: &str) -> String {
    format!("urn:li:member:{member_id}")
}

/// Builds the author reference for a numeric person id.
#[must_use]
pub fn person_urn(person_id: &str) -> String {
    format!("urn:li:person:{person_id}")
}

/// The resolved author identity for outbound actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorIdentity {
    /// The remote subject identifier.
    pub member_id: String,

    /// The author reference, `urn:li:member:{member_id}`.
    pub author_urn: String,

    /// Which signal produced the identifier.
    pub source: IdentitySource,
}

/// Checks a resolved identifier against a persisted one.
///
/// The single conflict rule, shared by every resolution source.
///
/// # Errors
///
/// Returns `IdentityMismatch` naming both values when they disagree.
pub fn check_identity_conflict(
    stored: Option<&str>,
    resolved: &str,
) -> Result<(), AuthError> {
    match stored {
        Some(stored) if stored != resolved => Err(AuthError::IdentityMismatch {
            stored: stored.to_string(),
            resolved: resolved.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Resolves the remote identity used to author outbound posts.
pub struct IdentityResolver {
    users: Arc<dyn UserStore>,
    credentials: Arc<CredentialManager>,
    provider: Arc<ProviderClient>,
    verifier: Arc<IdTokenVerifier>,
}

impl IdentityResolver {
    /// Creates a resolver over the given stores and provider client.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        credentials: Arc<CredentialManager>,
        provider: Arc<ProviderClient>,
        verifier: Arc<IdTokenVerifier>,
    ) -> Self {
        Self {
            users,
            credentials,
            provider,
            verifier,
        }
    }

    /// Resolves the author identity for a user holding a live access
    /// credential.
    ///
    /// The identifier source follows the provider configuration. In
    /// identity-token mode, a user whose login granted no identity token
    /// falls back to the userinfo call, and so does one whose stored token
    /// has expired since login: an expired token never vouches for an
    /// outbound write. The conflict rule applies either way.
    ///
    /// # Errors
    ///
    /// - `IdentityMismatch` if the resolved identifier disagrees with the
    ///   persisted one. Nothing is written in that case.
    /// - Verification errors from the stored identity token (other than
    ///   expiry, which falls back).
    /// - `UpstreamUnavailable` from the userinfo call.
    pub async fn resolve_author(
        &self,
        user_id: i64,
        access_token: &str,
    ) -> Result<AuthorIdentity, AuthError> {
        let (resolved, source) = match self.provider.config().identity_source {
            IdentitySource::VerifiedIdToken => match self.stored_id_token(user_id).await? {
                Some(id_token) => match self.verified_subject(&id_token).await {
                    Ok(sub) => (sub, IdentitySource::VerifiedIdToken),
                    Err(AuthError::TokenExpired { .. }) => {
                        tracing::warn!(
                            user_id,
                            "Stored identity token has expired, falling back to userinfo"
                        );
                        let sub = self.userinfo_subject(access_token).await?;
                        (sub, IdentitySource::UserinfoCall)
                    }
                    Err(err) => return Err(err),
                },
                None => {
                    tracing::warn!(
                        user_id,
                        "No stored identity token, falling back to userinfo"
                    );
                    let sub = self.userinfo_subject(access_token).await?;
                    (sub, IdentitySource::UserinfoCall)
                }
            },
            IdentitySource::UserinfoCall => {
                let sub = self.userinfo_subject(access_token).await?;
                (sub, IdentitySource::UserinfoCall)
            }
        };

        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| AuthError::storage(format!("no user with id {user_id}")))?;

        check_identity_conflict(user.member_id.as_deref(), &resolved)?;

        // First-write-wins persistence. A concurrent first write by a
        // different identifier is still a conflict.
        let effective = self
            .users
            .set_member_id_if_absent(user_id, &resolved)
            .await?;
        check_identity_conflict(Some(&effective), &resolved)?;

        tracing::debug!(user_id, member_id = %resolved, source = ?source, "Resolved author identity");

        Ok(AuthorIdentity {
            author_urn: member_urn(&resolved),
            member_id: resolved,
            source,
        })
    }

    /// Records a numeric person id captured by an explicitly-scoped call.
    ///
    /// First write wins, like `member_id`. Returns the effective stored
    /// value.
    ///
    /// # Errors
    ///
    /// Returns `Storage` errors from the backend.
    pub async fn record_person_id(
        &self,
        user_id: i64,
        person_id: &str,
    ) -> Result<String, AuthError> {
        self.users.set_person_id_if_absent(user_id, person_id).await
    }

    async fn stored_id_token(&self, user_id: i64) -> Result<Option<String>, AuthError> {
        Ok(self
            .credentials
            .latest(user_id)
            .await?
            .and_then(|c| c.id_token))
    }

    async fn verified_subject(&self, id_token: &str) -> Result<String, AuthError> {
        let options =
            VerifyOptions::default().with_audience(self.provider.config().client_id.clone());
        let claims = self.verifier.verify(id_token, &options).await?;
        Ok(claims.sub)
    }

    async fn userinfo_subject(&self, access_token: &str) -> Result<String, AuthError> {
        let userinfo = self.provider.fetch_userinfo(access_token).await?;
        Ok(userinfo.sub)
    }
}
