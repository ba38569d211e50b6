//! In-memory storage backend.
//!
//! Backs the test suite and local runs without a database. Data is lost on
//! restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::AuthError;

use super::{CredentialRecord, CredentialStore, NewCredentialRecord, User, UserStore};

/// In-memory user store.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<i64, User>>,
    next_id: AtomicI64,
}

impl MemoryUserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn upsert_by_email(&self, email: &str) -> Result<User, AuthError> {
        let mut users = self.users.write().await;
        if let Some(user) = users.values().find(|u| u.email == email) {
            return Ok(user.clone());
        }

        let user = User {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            email: email.to_string(),
            member_id: None,
            person_id: None,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, AuthError> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn set_member_id_if_absent(
        &self,
        user_id: i64,
        member_id: &str,
    ) -> Result<String, AuthError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::storage(format!("no user with id {user_id}")))?;

        match &user.member_id {
            Some(existing) => Ok(existing.clone()),
            None => {
                user.member_id = Some(member_id.to_string());
                Ok(member_id.to_string())
            }
        }
    }

    async fn set_person_id_if_absent(
        &self,
        user_id: i64,
        person_id: &str,
    ) -> Result<String, AuthError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::storage(format!("no user with id {user_id}")))?;

        match &user.person_id {
            Some(existing) => Ok(existing.clone()),
            None => {
                user.person_id = Some(person_id.to_string());
                Ok(person_id.to_string())
            }
        }
    }
}

/// In-memory credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: RwLock<Vec<CredentialRecord>>,
    next_id: AtomicI64,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn insert(&self, record: NewCredentialRecord) -> Result<CredentialRecord, AuthError> {
        let mut records = self.records.write().await;
        let record = CredentialRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: record.user_id,
            access_token_sealed: record.access_token_sealed,
            refresh_token_sealed: record.refresh_token_sealed,
            id_token_sealed: record.id_token_sealed,
            expires_at: record.expires_at,
            created_at: OffsetDateTime::now_utc(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn latest_for_user(&self, user_id: i64) -> Result<Option<CredentialRecord>, AuthError> {
        // Rows are appended in insertion order; the last matching row is the
        // latest login.
        Ok(self
            .records
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.user_id == user_id)
            .cloned())
    }

    async fn update_access(
        &self,
        record_id: i64,
        access_token_sealed: &str,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<(), AuthError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| AuthError::storage(format!("no credential record {record_id}")))?;

        record.access_token_sealed = access_token_sealed.to_string();
        record.expires_at = expires_at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_by_email_is_idempotent() {
        let store = MemoryUserStore::new();
        let first = store.upsert_by_email("member@example.com").await.unwrap();
        let second = store.upsert_by_email("member@example.com").await.unwrap();
        assert_eq!(first.id, second.id);

        let other = store.upsert_by_email("other@example.com").await.unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_member_id_first_write_wins() {
        let store = MemoryUserStore::new();
        let user = store.upsert_by_email("member@example.com").await.unwrap();

        let stored = store.set_member_id_if_absent(user.id, "AAA").await.unwrap();
        assert_eq!(stored, "AAA");

        // A later write with a different value is ignored.
        let stored = store.set_member_id_if_absent(user.id, "BBB").await.unwrap();
        assert_eq!(stored, "AAA");

        let user = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(user.member_id.as_deref(), Some("AAA"));
    }

    #[tokio::test]
    async fn test_latest_credential_per_user() {
        let store = MemoryCredentialStore::new();
        let first = store
            .insert(NewCredentialRecord {
                user_id: 1,
                access_token_sealed: "sealed-1".to_string(),
                refresh_token_sealed: None,
                id_token_sealed: None,
                expires_at: None,
            })
            .await
            .unwrap();
        let second = store
            .insert(NewCredentialRecord {
                user_id: 1,
                access_token_sealed: "sealed-2".to_string(),
                refresh_token_sealed: Some("sealed-r".to_string()),
                id_token_sealed: None,
                expires_at: None,
            })
            .await
            .unwrap();

        let latest = store.latest_for_user(1).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_ne!(latest.id, first.id);
        assert!(store.latest_for_user(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_access_in_place() {
        let store = MemoryCredentialStore::new();
        let record = store
            .insert(NewCredentialRecord {
                user_id: 1,
                access_token_sealed: "sealed-old".to_string(),
                refresh_token_sealed: Some("sealed-r".to_string()),
                id_token_sealed: Some("sealed-id".to_string()),
                expires_at: None,
            })
            .await
            .unwrap();

        let expires = OffsetDateTime::now_utc() + time::Duration::hours(1);
        store
            .update_access(record.id, "sealed-new", Some(expires))
            .await
            .unwrap();

        let latest = store.latest_for_user(1).await.unwrap().unwrap();
        assert_eq!(latest.id, record.id);
        assert_eq!(latest.access_token_sealed, "sealed-new");
        assert_eq!(latest.expires_at, Some(expires));
        // Refresh and identity tokens untouched.
        assert_eq!(latest.refresh_token_sealed.as_deref(), Some("sealed-r"));
        assert_eq!(latest.id_token_sealed.as_deref(), Some("sealed-id"));
    }

    #[tokio::test]
    async fn test_update_unknown_record_fails() {
        let store = MemoryCredentialStore::new();
        let err = store.update_access(99, "sealed", None).await.unwrap_err();
        assert!(matches!(err, AuthError::Storage { .. }));
    }
}
