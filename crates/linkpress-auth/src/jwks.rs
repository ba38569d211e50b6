//! Provider signing key fetching and caching.
//!
//! When validating identity tokens from the provider we need its public
//! signing keys. This module provides [`KeyRingCache`], which fetches the
//! provider's JSON Web Key Set and caches it for the lifetime of the
//! process.
//!
//! # Cache Policy
//!
//! - A cached set younger than the staleness window (default 1 hour) is
//!   served without a network call.
//! - A cached set older than the window triggers a refetch; if the fetch
//!   fails and a stale set exists, the stale set is served (serve-stale-on-
//!   error) so a provider outage does not take down verification of tokens
//!   signed with known keys.
//! - With no cached set at all, a fetch failure propagates as
//!   `UpstreamUnavailable`.
//!
//! Refreshes are serialized by a dedicated refresh lock, with the staleness
//! check repeated after acquiring it, so two concurrent verifications
//! cannot both decide to refetch. The cache lock itself is only ever held
//! to read or swap the set, never across the network fetch, so readers are
//! never blocked behind a slow key endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::error::AuthError;

/// Default staleness window for a cached key set (1 hour).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Configuration for the key ring cache.
#[derive(Debug, Clone)]
pub struct KeyRingCacheConfig {
    /// Maximum age of a cached key set before a refetch is attempted.
    pub max_age: Duration,

    /// HTTP request timeout for the key endpoint (default: 10 seconds).
    pub request_timeout: Duration,
}

impl Default for KeyRingCacheConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl KeyRingCacheConfig {
    /// Sets the staleness window.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Cached key set with its fetch timestamp.
struct CachedKeys {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

/// Process-wide cache of the provider's signing key set.
pub struct KeyRingCache {
    /// HTTP client for fetching the key set.
    http_client: reqwest::Client,
    /// The key endpoint.
    jwks_url: Url,
    /// Cached set, replaced wholesale on refresh. Never held across the
    /// fetch.
    cache: RwLock<Option<CachedKeys>>,
    /// Serializes refetch decisions without blocking readers.
    refresh_lock: Mutex<()>,
    /// Cache configuration.
    config: KeyRingCacheConfig,
}

impl KeyRingCache {
    /// Creates a new key ring cache for the given key endpoint.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(jwks_url: Url, config: KeyRingCacheConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            jwks_url,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            config,
        }
    }

    /// Returns the current key set, fetching or refreshing per the cache
    /// policy.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnavailable` if the key endpoint is unreachable and
    /// no cached set exists.
    pub async fn get_keys(&self) -> Result<Arc<JwkSet>, AuthError> {
        // Fast path: fresh cached set.
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.fetched_at.elapsed() < self.config.max_age
            {
                return Ok(Arc::clone(&cached.keys));
            }
        }

        // Slow path: serialize the refetch behind the refresh lock so
        // concurrent callers do not all fetch, and re-check after acquiring
        // it. The fetch itself runs with no cache lock held.
        let _refresh = self.refresh_lock.lock().await;
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.fetched_at.elapsed() < self.config.max_age
            {
                return Ok(Arc::clone(&cached.keys));
            }
        }

        match self.fetch().await {
            Ok(keys) => Ok(self.store(keys).await),
            Err(err) => {
                let cache = self.cache.read().await;
                if let Some(cached) = cache.as_ref() {
                    tracing::warn!(
                        error = %err,
                        "Key endpoint unavailable, serving stale signing key set"
                    );
                    return Ok(Arc::clone(&cached.keys));
                }
                Err(err)
            }
        }
    }

    /// Forces a refetch of the key set, replacing the cache on success.
    ///
    /// Used by the verifier when a token references a key id absent from the
    /// current set. Unlike [`get_keys`](Self::get_keys) this never serves a
    /// stale set: the caller explicitly wants the provider's current keys.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnavailable` if the fetch fails.
    pub async fn refresh(&self) -> Result<Arc<JwkSet>, AuthError> {
        let _refresh = self.refresh_lock.lock().await;
        let keys = self.fetch().await?;
        Ok(self.store(keys).await)
    }

    /// Swaps the cached set. The write lock is held only for the swap.
    async fn store(&self, keys: JwkSet) -> Arc<JwkSet> {
        let keys = Arc::new(keys);
        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeys {
            keys: Arc::clone(&keys),
            fetched_at: Instant::now(),
        });
        keys
    }

    /// Fetches the key set from the endpoint.
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        tracing::debug!(url = %self.jwks_url, "Fetching provider signing keys");

        let response = self
            .http_client
            .get(self.jwks_url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthError::upstream(format!("key endpoint request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::upstream(format!(
                "key endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::upstream(format!("failed to parse key set: {e}")))?;

        tracing::debug!(count = keys.keys.len(), "Cached provider signing keys");
        Ok(keys)
    }
}

/// Finds a key by id in a key set and converts it to a decoding key.
///
/// Returns the `DecodingKey` and the algorithm declared on the JWK, if any.
/// Keys that fail conversion are treated as absent.
#[must_use]
pub fn find_key(keys: &JwkSet, kid: &str) -> Option<(DecodingKey, Option<Algorithm>)> {
    keys.keys
        .iter()
        .find(|k| k.common.key_id.as_deref() == Some(kid))
        .and_then(|jwk| {
            DecodingKey::from_jwk(jwk)
                .ok()
                .map(|dk| (dk, jwk_algorithm(jwk)))
        })
}

/// Extracts the asymmetric signature algorithm declared on a JWK.
///
/// Symmetric and encryption algorithms map to `None`; the verifier rejects
/// them outright.
fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        jsonwebtoken::jwk::KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        jsonwebtoken::jwk::KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        jsonwebtoken::jwk::KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        jsonwebtoken::jwk::KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        jsonwebtoken::jwk::KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        jsonwebtoken::jwk::KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        jsonwebtoken::jwk::KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        jsonwebtoken::jwk::KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        jsonwebtoken::jwk::KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}
