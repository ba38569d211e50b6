//! Credential lifecycle over the vault and store.
//!
//! [`CredentialManager`] is the only component that sees both plaintext
//! tokens and the storage layer. It seals token grants into append-only
//! credential rows, opens the latest row for a user, and performs the
//! in-place access update on the refresh path.

use std::fmt;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::error::AuthError;
use crate::provider::TokenGrant;
use crate::storage::{CredentialRecord, CredentialStore, NewCredentialRecord};
use crate::vault::CredentialVault;

/// Decrypted credentials for a user's latest login.
#[derive(Clone)]
pub struct Credentials {
    /// The credential row these values came from.
    pub record_id: i64,

    /// Owning user.
    pub user_id: i64,

    /// Plaintext access token.
    pub access_token: String,

    /// Plaintext refresh token, when one was granted.
    pub refresh_token: Option<String>,

    /// Plaintext identity token from the login exchange.
    pub id_token: Option<String>,

    /// Access token expiry.
    pub expires_at: Option<OffsetDateTime>,
}

impl Credentials {
    /// Returns `true` if the access token is expiring as of `now`.
    ///
    /// Same policy as [`CredentialRecord::is_expiring_at`]: no known expiry
    /// counts as expiring.
    #[must_use]
    pub fn is_expiring_at(&self, now: OffsetDateTime, skew: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - now < skew,
            None => true,
        }
    }
}

// Token values stay out of debug output.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("record_id", &self.record_id)
            .field("user_id", &self.user_id)
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Seals and opens credential rows for the storage backend.
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    vault: Arc<CredentialVault>,
}

impl CredentialManager {
    /// Creates a manager over the given store and vault.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, vault: Arc<CredentialVault>) -> Self {
        Self { store, vault }
    }

    /// Seals a token grant and appends a new credential row.
    ///
    /// # Errors
    ///
    /// Returns `VaultMisconfigured` or `Storage` errors from the layers
    /// below.
    pub async fn store_grant(
        &self,
        user_id: i64,
        grant: &TokenGrant,
    ) -> Result<CredentialRecord, AuthError> {
        let expires_at = grant.expires_in.map(expiry_from_lifetime);

        let record = NewCredentialRecord {
            user_id,
            access_token_sealed: self.vault.seal(&grant.access_token)?,
            refresh_token_sealed: grant
                .refresh_token
                .as_deref()
                .map(|t| self.vault.seal(t))
                .transpose()?,
            id_token_sealed: grant
                .id_token
                .as_deref()
                .map(|t| self.vault.seal(t))
                .transpose()?,
            expires_at,
        };

        let record = self.store.insert(record).await?;
        tracing::info!(
            user_id,
            record_id = record.id,
            has_refresh_token = record.refresh_token_sealed.is_some(),
            has_id_token = record.id_token_sealed.is_some(),
            "Stored credential grant"
        );
        Ok(record)
    }

    /// Opens the latest credential row for a user.
    ///
    /// # Errors
    ///
    /// Returns `CorruptCredential` if any sealed field fails to open, and
    /// `Storage` errors from the backend.
    pub async fn latest(&self, user_id: i64) -> Result<Option<Credentials>, AuthError> {
        let Some(record) = self.store.latest_for_user(user_id).await? else {
            return Ok(None);
        };

        let credentials = Credentials {
            record_id: record.id,
            user_id: record.user_id,
            access_token: self.vault.open(&record.access_token_sealed)?,
            refresh_token: record
                .refresh_token_sealed
                .as_deref()
                .map(|s| self.vault.open(s))
                .transpose()?,
            id_token: record
                .id_token_sealed
                .as_deref()
                .map(|s| self.vault.open(s))
                .transpose()?,
            expires_at: record.expires_at,
        };
        Ok(Some(credentials))
    }

    /// Seals a refreshed access token into an existing row.
    ///
    /// Returns the new expiry for the caller to report.
    ///
    /// # Errors
    ///
    /// Returns `VaultMisconfigured` or `Storage` errors from the layers
    /// below.
    pub async fn update_access(
        &self,
        record_id: i64,
        access_token: &str,
        expires_in: Option<u64>,
    ) -> Result<Option<OffsetDateTime>, AuthError> {
        let expires_at = expires_in.map(expiry_from_lifetime);
        let sealed = self.vault.seal(access_token)?;
        self.store.update_access(record_id, &sealed, expires_at).await?;
        tracing::info!(record_id, "Updated access credential in place");
        Ok(expires_at)
    }
}

fn expiry_from_lifetime(seconds: u64) -> OffsetDateTime {
    OffsetDateTime::now_utc() + Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use crate::storage::memory::MemoryCredentialStore;

    use super::*;

    fn manager() -> CredentialManager {
        let vault = Arc::new(CredentialVault::new(&[7u8; 32]).unwrap());
        CredentialManager::new(Arc::new(MemoryCredentialStore::new()), vault)
    }

    fn grant() -> TokenGrant {
        TokenGrant {
            access_token: "AQXdLV".to_string(),
            expires_in: Some(5_184_000),
            refresh_token: Some("AQWrTV".to_string()),
            refresh_token_expires_in: None,
            id_token: Some("eyJ.header.sig".to_string()),
            scope: None,
        }
    }

    #[tokio::test]
    async fn test_store_and_open_round_trip() {
        let manager = manager();
        let record = manager.store_grant(1, &grant()).await.unwrap();
        // Sealed fields never hold the plaintext.
        assert_ne!(record.access_token_sealed, "AQXdLV");
        assert!(record.expires_at.is_some());

        let credentials = manager.latest(1).await.unwrap().unwrap();
        assert_eq!(credentials.record_id, record.id);
        assert_eq!(credentials.access_token, "AQXdLV");
        assert_eq!(credentials.refresh_token.as_deref(), Some("AQWrTV"));
        assert_eq!(credentials.id_token.as_deref(), Some("eyJ.header.sig"));
    }

    #[tokio::test]
    async fn test_no_record_is_none() {
        assert!(manager().latest(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_access_preserves_other_tokens() {
        let manager = manager();
        let record = manager.store_grant(1, &grant()).await.unwrap();

        let expires = manager
            .update_access(record.id, "AQNewTok", Some(86_400))
            .await
            .unwrap();
        assert!(expires.is_some());

        let credentials = manager.latest(1).await.unwrap().unwrap();
        assert_eq!(credentials.access_token, "AQNewTok");
        assert_eq!(credentials.refresh_token.as_deref(), Some("AQWrTV"));
        assert_eq!(credentials.id_token.as_deref(), Some("eyJ.header.sig"));
    }

    #[tokio::test]
    async fn test_wrong_vault_key_is_corrupt() {
        let store = Arc::new(MemoryCredentialStore::new());
        let writer = CredentialManager::new(
            Arc::clone(&store) as Arc<dyn CredentialStore>,
            Arc::new(CredentialVault::new(&[7u8; 32]).unwrap()),
        );
        writer.store_grant(1, &grant()).await.unwrap();

        let reader = CredentialManager::new(
            store as Arc<dyn CredentialStore>,
            Arc::new(CredentialVault::new(&[8u8; 32]).unwrap()),
        );
        let err = reader.latest(1).await.unwrap_err();
        assert!(matches!(err, AuthError::CorruptCredential));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let credentials = Credentials {
            record_id: 1,
            user_id: 1,
            access_token: "AQXdLV".to_string(),
            refresh_token: Some("AQWrTV".to_string()),
            id_token: None,
            expires_at: None,
        };
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("AQXdLV"));
        assert!(!debug.contains("AQWrTV"));
        assert!(debug.contains("[redacted]"));
    }
}
