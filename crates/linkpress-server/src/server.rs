//! Server assembly.
//!
//! Builds the full router from the environment: provider configuration,
//! vault key, and either the Postgres backend (when `DATABASE_URL` is set)
//! or the in-memory backend for keyless local runs.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use linkpress_auth::config::ProviderConfig;
use linkpress_auth::credentials::CredentialManager;
use linkpress_auth::flow::AuthFlowController;
use linkpress_auth::http::{self, AuthState};
use linkpress_auth::jwks::{KeyRingCache, KeyRingCacheConfig};
use linkpress_auth::provider::ProviderClient;
use linkpress_auth::refresh::RefreshOrchestrator;
use linkpress_auth::resolver::IdentityResolver;
use linkpress_auth::storage::memory::{MemoryCredentialStore, MemoryUserStore};
use linkpress_auth::storage::{CredentialStore, UserStore};
use linkpress_auth::vault::CredentialVault;
use linkpress_auth::verifier::IdTokenVerifier;
use linkpress_auth::AuthError;

use crate::platform::PlatformClient;
use crate::publish::{self, PublishState};

/// Builds the application router from the environment.
///
/// # Errors
///
/// Returns `VaultMisconfigured` if no vault key is configured, and
/// `Configuration` / `Storage` errors for the remaining setup.
pub async fn build_router() -> Result<Router, AuthError> {
    let config = ProviderConfig::from_env()?;
    let vault = Arc::new(CredentialVault::from_env()?);

    let (users, credential_store): (Arc<dyn UserStore>, Arc<dyn CredentialStore>) =
        match std::env::var("DATABASE_URL") {
            Ok(url) => {
                let pool = linkpress_auth_postgres::connect(&url).await?;
                linkpress_auth_postgres::ensure_schema(&pool).await?;
                tracing::info!("Using PostgreSQL storage backend");
                (
                    Arc::new(linkpress_auth_postgres::PgUserStore::new(pool.clone())),
                    Arc::new(linkpress_auth_postgres::PgCredentialStore::new(pool)),
                )
            }
            Err(_) => {
                tracing::warn!("DATABASE_URL not set, using in-memory storage");
                (
                    Arc::new(MemoryUserStore::new()),
                    Arc::new(MemoryCredentialStore::new()),
                )
            }
        };

    let credentials = Arc::new(CredentialManager::new(credential_store, vault));
    let key_ring = Arc::new(KeyRingCache::new(
        config.jwks_url.clone(),
        KeyRingCacheConfig::default(),
    ));
    let verifier = Arc::new(IdTokenVerifier::new(key_ring));
    let provider = Arc::new(ProviderClient::new(config));

    let flow = Arc::new(AuthFlowController::new(
        Arc::clone(&provider),
        Arc::clone(&users),
        Arc::clone(&credentials),
        Arc::clone(&verifier),
    ));
    let refresher = Arc::new(RefreshOrchestrator::new(
        Arc::clone(&credentials),
        Arc::clone(&provider),
    ));
    let resolver = Arc::new(IdentityResolver::new(
        users,
        credentials,
        provider,
        verifier,
    ));
    let platform = Arc::new(PlatformClient::from_env()?);

    let router = Router::new()
        .route("/health", get(health))
        .merge(http::router(AuthState {
            flow,
            refresher: Arc::clone(&refresher),
            resolver: Arc::clone(&resolver),
        }))
        .merge(publish::router(PublishState {
            refresher,
            resolver,
            platform,
        }));

    Ok(router)
}

/// `GET /health` - liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
