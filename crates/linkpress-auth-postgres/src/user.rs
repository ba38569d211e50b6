//! User storage.
//!
//! Local accounts in the `users` table. The `member_id` and `person_id`
//! columns are written at most once each; the first-write-wins rule is
//! enforced in SQL with `COALESCE`, so concurrent resolutions cannot
//! overwrite an existing identifier.

use async_trait::async_trait;
use linkpress_auth::AuthError;
use linkpress_auth::storage::{User, UserStore};
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::{PgPool, db_error};

type UserTuple = (
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    OffsetDateTime,
);

fn from_tuple(row: UserTuple) -> User {
    User {
        id: row.0,
        email: row.1.unwrap_or_default(),
        member_id: row.2,
        person_id: row.3,
        created_at: row.4,
    }
}

/// PostgreSQL-backed user store.
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Creates a store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn upsert_by_email(&self, email: &str) -> Result<User, AuthError> {
        // The no-op update makes RETURNING yield the row on conflict too.
        let row: UserTuple = query_as(
            r"
            INSERT INTO users (email)
            VALUES ($1)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING id, email, member_id, person_id, created_at
            ",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(from_tuple(row))
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, AuthError> {
        let row: Option<UserTuple> = query_as(
            r"
            SELECT id, email, member_id, person_id, created_at
            FROM users
            WHERE id = $1
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(from_tuple))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let row: Option<UserTuple> = query_as(
            r"
            SELECT id, email, member_id, person_id, created_at
            FROM users
            WHERE email = $1
            ",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(from_tuple))
    }

    async fn set_member_id_if_absent(
        &self,
        user_id: i64,
        member_id: &str,
    ) -> Result<String, AuthError> {
        let row: Option<(Option<String>,)> = query_as(
            r"
            UPDATE users
            SET member_id = COALESCE(member_id, $2)
            WHERE id = $1
            RETURNING member_id
            ",
        )
        .bind(user_id)
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some((Some(effective),)) => Ok(effective),
            Some((None,)) | None => Err(AuthError::storage(format!(
                "no user with id {user_id}"
            ))),
        }
    }

    async fn set_person_id_if_absent(
        &self,
        user_id: i64,
        person_id: &str,
    ) -> Result<String, AuthError> {
        let row: Option<(Option<String>,)> = query_as(
            r"
            UPDATE users
            SET person_id = COALESCE(person_id, $2)
            WHERE id = $1
            RETURNING person_id
            ",
        )
        .bind(user_id)
        .bind(person_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some((Some(effective),)) => Ok(effective),
            Some((None,)) | None => Err(AuthError::storage(format!(
                "no user with id {user_id}"
            ))),
        }
    }
}
