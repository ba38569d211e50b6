//! Storage traits and models for users and credential records.
//!
//! Backends implement [`UserStore`] and [`CredentialStore`]. The in-memory
//! backend in [`memory`] backs tests and keyless local runs; the Postgres
//! backend lives in the `linkpress-auth-postgres` crate.
//!
//! Credential records are append-only: each completed login inserts a new
//! row, and reads always take the most recent row per user. The single
//! exception is the hot refresh path, which replaces the access token and
//! expiry of an existing row in place via
//! [`CredentialStore::update_access`].

pub mod memory;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};

use crate::error::AuthError;

/// Default expiry skew: a credential within 5 minutes of expiry is treated
/// as expiring.
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::seconds(300);

/// A local user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Local user id.
    pub id: i64,

    /// Login email, unique per user.
    pub email: String,

    /// Provider member id, persisted on first identity resolution.
    /// First write wins; later resolutions compare against it.
    pub member_id: Option<String>,

    /// Provider person id, captured from userinfo when available.
    pub person_id: Option<String>,

    /// When the account was created.
    pub created_at: OffsetDateTime,
}

/// A stored credential row. Token fields hold vault ciphertexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Row id.
    pub id: i64,

    /// Owning user.
    pub user_id: i64,

    /// Sealed access token.
    pub access_token_sealed: String,

    /// Sealed refresh token, when the provider granted one.
    pub refresh_token_sealed: Option<String>,

    /// Sealed identity token from the login exchange.
    pub id_token_sealed: Option<String>,

    /// Access token expiry. Absent when the provider gave no lifetime.
    pub expires_at: Option<OffsetDateTime>,

    /// When this row was inserted.
    pub created_at: OffsetDateTime,
}

impl CredentialRecord {
    /// Returns `true` if the access token is expiring as of `now`.
    ///
    /// A credential with no known expiry is always treated as expiring, so
    /// it flows through the refresh path rather than being served blindly.
    #[must_use]
    pub fn is_expiring_at(&self, now: OffsetDateTime, skew: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - now < skew,
            None => true,
        }
    }

    /// Returns `true` if the access token is expiring within the default
    /// skew window.
    #[must_use]
    pub fn is_expiring(&self) -> bool {
        self.is_expiring_at(OffsetDateTime::now_utc(), DEFAULT_EXPIRY_SKEW)
    }
}

/// Fields for a new credential row.
#[derive(Debug, Clone)]
pub struct NewCredentialRecord {
    /// Owning user.
    pub user_id: i64,

    /// Sealed access token.
    pub access_token_sealed: String,

    /// Sealed refresh token.
    pub refresh_token_sealed: Option<String>,

    /// Sealed identity token.
    pub id_token_sealed: Option<String>,

    /// Access token expiry.
    pub expires_at: Option<OffsetDateTime>,
}

/// Storage for local user accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Finds a user by email, creating the account if absent.
    async fn upsert_by_email(&self, email: &str) -> Result<User, AuthError>;

    /// Gets a user by id.
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, AuthError>;

    /// Gets a user by email.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    /// Persists the provider member id if none is stored yet.
    ///
    /// Returns the effective stored value: the existing id when one was
    /// already present, otherwise the newly written one.
    async fn set_member_id_if_absent(
        &self,
        user_id: i64,
        member_id: &str,
    ) -> Result<String, AuthError>;

    /// Persists the provider person id if none is stored yet.
    ///
    /// Returns the effective stored value, as with
    /// [`set_member_id_if_absent`](Self::set_member_id_if_absent).
    async fn set_person_id_if_absent(
        &self,
        user_id: i64,
        person_id: &str,
    ) -> Result<String, AuthError>;
}

/// Storage for credential records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Inserts a new credential row for a completed login.
    async fn insert(&self, record: NewCredentialRecord) -> Result<CredentialRecord, AuthError>;

    /// Returns the most recent credential row for the user, if any.
    async fn latest_for_user(&self, user_id: i64) -> Result<Option<CredentialRecord>, AuthError>;

    /// Replaces the access token and expiry of an existing row in place.
    ///
    /// Refresh tokens and identity tokens are untouched: the provider does
    /// not reissue them on refresh.
    async fn update_access(
        &self,
        record_id: i64,
        access_token_sealed: &str,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<(), AuthError>;
}
