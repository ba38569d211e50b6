//! Identity and credential lifecycle for the Linkpress publisher.
//!
//! This crate owns everything between "a user clicked log in" and "we hold
//! a fresh, correctly-attributed access credential for them":
//!
//! - [`flow`] - interactive login redirect and callback, with single-use
//!   anti-forgery state
//! - [`provider`] - OAuth2 client for the provider's token and userinfo
//!   endpoints
//! - [`jwks`] / [`verifier`] - signing key cache and identity token
//!   verification
//! - [`vault`] / [`credentials`] / [`storage`] - credential encryption at
//!   rest and the append-only credential store
//! - [`refresh`] - serves fresh access tokens, refreshing expiring ones
//! - [`resolver`] - resolves the remote identity posts are authored as,
//!   failing closed on mismatch
//! - [`http`] - axum routes exposing the flow
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use linkpress_auth::config::ProviderConfig;
//! use linkpress_auth::credentials::CredentialManager;
//! use linkpress_auth::provider::ProviderClient;
//! use linkpress_auth::refresh::RefreshOrchestrator;
//! use linkpress_auth::storage::memory::MemoryCredentialStore;
//! use linkpress_auth::vault::CredentialVault;
//!
//! let config = ProviderConfig::from_env()?;
//! let vault = Arc::new(CredentialVault::from_env()?);
//! let credentials = Arc::new(CredentialManager::new(
//!     Arc::new(MemoryCredentialStore::new()),
//!     vault,
//! ));
//! let provider = Arc::new(ProviderClient::new(config));
//! let refresher = RefreshOrchestrator::new(credentials, provider);
//!
//! let access = refresher.ensure_fresh(user_id).await?;
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod flow;
pub mod http;
pub mod jwks;
pub mod provider;
pub mod refresh;
pub mod resolver;
pub mod retry;
pub mod storage;
pub mod vault;
pub mod verifier;

pub use config::{IdentitySource, ProviderConfig};
pub use credentials::{CredentialManager, Credentials};
pub use error::{AuthError, ErrorCategory};
pub use flow::{AuthFlowController, CallbackOutcome, CallbackParams};
pub use jwks::{KeyRingCache, KeyRingCacheConfig};
pub use provider::{ProviderClient, TokenGrant, UserinfoResponse};
pub use refresh::{FreshAccess, RefreshOrchestrator};
pub use resolver::{AuthorIdentity, IdentityResolver};
pub use retry::RetryPolicy;
pub use vault::CredentialVault;
pub use verifier::{IdTokenClaims, IdTokenVerifier, VerifyOptions};
