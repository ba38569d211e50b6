//! PostgreSQL storage backend for linkpress-auth.
//!
//! Implements the [`linkpress_auth::storage`] traits over two tables:
//!
//! - `users` - local accounts keyed by integer id, with nullable `email`,
//!   `member_id`, `person_id`
//! - `credentials` - append-only credential rows with sealed token fields
//!   and a nullable expiry
//!
//! Token fields hold vault ciphertexts; this crate never sees plaintext
//! credential material.
//!
//! # Example
//!
//! ```ignore
//! use linkpress_auth_postgres::{connect, ensure_schema, PgCredentialStore, PgUserStore};
//!
//! let pool = connect("postgres://localhost/linkpress").await?;
//! ensure_schema(&pool).await?;
//!
//! let users = PgUserStore::new(pool.clone());
//! let credentials = PgCredentialStore::new(pool);
//! ```

pub mod credential;
pub mod user;

use linkpress_auth::AuthError;
use sqlx_core::pool::{Pool, PoolOptions};
use sqlx_core::query::query;
use sqlx_postgres::Postgres;

pub use credential::PgCredentialStore;
pub use user::PgUserStore;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

/// Connects to the database.
///
/// # Errors
///
/// Returns `Storage` if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<PgPool, AuthError> {
    PoolOptions::<Postgres>::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|e| AuthError::storage(format!("failed to connect to database: {e}")))
}

/// Creates the tables and indexes if they do not exist yet.
///
/// Idempotent; run once at startup.
///
/// # Errors
///
/// Returns `Storage` if a DDL statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), AuthError> {
    let statements = [
        r"
        CREATE TABLE IF NOT EXISTS users (
            id BIGSERIAL PRIMARY KEY,
            email TEXT UNIQUE,
            member_id TEXT,
            person_id TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        ",
        r"
        CREATE TABLE IF NOT EXISTS credentials (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id),
            access_token_sealed TEXT NOT NULL,
            refresh_token_sealed TEXT,
            id_token_sealed TEXT,
            expires_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        ",
        r"
        CREATE INDEX IF NOT EXISTS credentials_user_id_id_idx
            ON credentials (user_id, id DESC)
        ",
    ];

    for statement in statements {
        query(statement)
            .execute(pool)
            .await
            .map_err(|e| AuthError::storage(format!("schema creation failed: {e}")))?;
    }

    tracing::debug!("Database schema is in place");
    Ok(())
}

/// Maps a database error to the auth error taxonomy.
pub(crate) fn db_error(e: sqlx_core::Error) -> AuthError {
    AuthError::storage(format!("database error: {e}"))
}
