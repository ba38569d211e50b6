//! Credential storage.
//!
//! Append-only credential rows in the `credentials` table. "The current
//! credential" is always the highest-id row per user; the in-place access
//! update on the refresh path is a single-statement atomic replacement.

use async_trait::async_trait;
use linkpress_auth::AuthError;
use linkpress_auth::storage::{CredentialRecord, CredentialStore, NewCredentialRecord};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::{PgPool, db_error};

type CredentialTuple = (
    i64,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<OffsetDateTime>,
    OffsetDateTime,
);

fn from_tuple(row: CredentialTuple) -> CredentialRecord {
    CredentialRecord {
        id: row.0,
        user_id: row.1,
        access_token_sealed: row.2,
        refresh_token_sealed: row.3,
        id_token_sealed: row.4,
        expires_at: row.5,
        created_at: row.6,
    }
}

/// PostgreSQL-backed credential store.
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    /// Creates a store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn insert(&self, record: NewCredentialRecord) -> Result<CredentialRecord, AuthError> {
        let row: CredentialTuple = query_as(
            r"
            INSERT INTO credentials
                (user_id, access_token_sealed, refresh_token_sealed, id_token_sealed, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, access_token_sealed, refresh_token_sealed,
                      id_token_sealed, expires_at, created_at
            ",
        )
        .bind(record.user_id)
        .bind(&record.access_token_sealed)
        .bind(&record.refresh_token_sealed)
        .bind(&record.id_token_sealed)
        .bind(record.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(from_tuple(row))
    }

    async fn latest_for_user(&self, user_id: i64) -> Result<Option<CredentialRecord>, AuthError> {
        let row: Option<CredentialTuple> = query_as(
            r"
            SELECT id, user_id, access_token_sealed, refresh_token_sealed,
                   id_token_sealed, expires_at, created_at
            FROM credentials
            WHERE user_id = $1
            ORDER BY id DESC
            LIMIT 1
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(from_tuple))
    }

    async fn update_access(
        &self,
        record_id: i64,
        access_token_sealed: &str,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<(), AuthError> {
        let result = query(
            r"
            UPDATE credentials
            SET access_token_sealed = $2, expires_at = $3
            WHERE id = $1
            ",
        )
        .bind(record_id)
        .bind(access_token_sealed)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(AuthError::storage(format!(
                "no credential record {record_id}"
            )));
        }
        Ok(())
    }
}
