//! Interactive authorization flow.
//!
//! [`AuthFlowController`] manages the login redirect and callback exchange
//! that creates credential records. Its state machine is small but strict:
//!
//! - `begin_login` issues a fresh random anti-forgery state and returns the
//!   provider's authorization URL carrying it.
//! - `complete_callback` consumes the presented state exactly once, on any
//!   outcome. A state that is absent, unknown, or already consumed fails
//!   with `InvalidState`; a consumed state is gone even when the provider
//!   reported an error, so a previously-started flow cannot be replayed.
//!
//! On a valid callback the controller exchanges the code, identifies the
//! user from the identity token (or userinfo when none was granted), upserts
//! the local account, and stores the sealed credential row.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use tokio::sync::Mutex;

use crate::credentials::CredentialManager;
use crate::error::AuthError;
use crate::provider::ProviderClient;
use crate::resolver::check_identity_conflict;
use crate::storage::UserStore;
use crate::verifier::{IdTokenVerifier, VerifyOptions};

/// Random bytes per state token, before base64 encoding.
const STATE_TOKEN_BYTES: usize = 24;

/// Pending anti-forgery states, shared across concurrent requests.
///
/// The membership check and removal happen under one lock acquisition, so
/// two concurrent callbacks cannot both consume the same state.
#[derive(Default)]
pub struct StateStore {
    pending: Mutex<HashSet<String>>,
}

impl StateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Issues a fresh random state token.
    pub async fn issue(&self) -> String {
        let mut bytes = [0u8; STATE_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let state = URL_SAFE_NO_PAD.encode(bytes);

        self.pending.lock().await.insert(state.clone());
        state
    }

    /// Consumes a state token, returning whether it was pending.
    pub async fn consume(&self, state: &str) -> bool {
        self.pending.lock().await.remove(state)
    }
}

/// Query parameters presented on the provider callback.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CallbackParams {
    /// Authorization code, present on success.
    pub code: Option<String>,

    /// Anti-forgery state issued at login.
    pub state: Option<String>,

    /// Provider error code, present when the user denied or the provider
    /// failed.
    pub error: Option<String>,

    /// Human-readable provider error description.
    pub error_description: Option<String>,
}

/// Result of a completed callback.
#[derive(Clone, serde::Serialize)]
pub struct CallbackOutcome {
    /// The local user the credential was stored for.
    pub user_id: i64,

    /// Access token lifetime reported by the provider.
    pub expires_in: Option<u64>,

    /// Whether the grant included an identity token.
    pub has_id_token: bool,

    /// The member id persisted for the user, when known.
    pub member_id: Option<String>,
}

impl fmt::Debug for CallbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackOutcome")
            .field("user_id", &self.user_id)
            .field("expires_in", &self.expires_in)
            .field("has_id_token", &self.has_id_token)
            .field("member_id", &self.member_id)
            .finish()
    }
}

/// Drives the interactive login flow.
pub struct AuthFlowController {
    provider: Arc<ProviderClient>,
    users: Arc<dyn UserStore>,
    credentials: Arc<CredentialManager>,
    verifier: Arc<IdTokenVerifier>,
    states: StateStore,
}

impl AuthFlowController {
    /// Creates a controller over the given provider client and stores.
    #[must_use]
    pub fn new(
        provider: Arc<ProviderClient>,
        users: Arc<dyn UserStore>,
        credentials: Arc<CredentialManager>,
        verifier: Arc<IdTokenVerifier>,
    ) -> Self {
        Self {
            provider,
            users,
            credentials,
            verifier,
            states: StateStore::new(),
        }
    }

    /// Issues a state token and returns the authorization URL to redirect
    /// the user to.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if client id, secret, or redirect URI are
    /// missing. No state is issued in that case.
    pub async fn begin_login(&self) -> Result<url::Url, AuthError> {
        self.provider.config().validate()?;

        let state = self.states.issue().await;
        let url = self.provider.authorization_url(&state);
        tracing::info!("Issued login redirect");
        Ok(url)
    }

    /// Completes the provider callback: consumes the state, exchanges the
    /// code, identifies the user, and stores the sealed credential row.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the state is absent, unknown, or replayed.
    /// - `ReauthRequired` if the provider reported an error or sent no
    ///   code; the state is consumed regardless.
    /// - `UpstreamUnavailable` / verification / storage errors from the
    ///   exchange onward.
    pub async fn complete_callback(
        &self,
        params: &CallbackParams,
    ) -> Result<CallbackOutcome, AuthError> {
        let state = params
            .state
            .as_deref()
            .ok_or_else(|| AuthError::invalid_state("callback carried no state parameter"))?;

        if !self.states.consume(state).await {
            return Err(AuthError::invalid_state(
                "state is unknown or already consumed",
            ));
        }

        if let Some(error) = &params.error {
            let description = params.error_description.as_deref().unwrap_or_default();
            tracing::warn!(error, "Provider reported callback error");
            return Err(AuthError::reauth_required(format!(
                "provider returned error on callback: {error} {description}"
            )));
        }

        let code = params
            .code
            .as_deref()
            .ok_or_else(|| AuthError::reauth_required("callback carried no authorization code"))?;

        let grant = self.provider.exchange_code(code).await?;

        // Identify the remote account behind the grant. Prefer the identity
        // token; a grant without one falls back to userinfo.
        let (sub, email) = match grant.id_token.as_deref() {
            Some(id_token) => {
                let options = VerifyOptions::default()
                    .with_audience(self.provider.config().client_id.clone());
                let claims = self.verifier.verify(id_token, &options).await?;
                (claims.sub, claims.email)
            }
            None => {
                let userinfo = self.provider.fetch_userinfo(&grant.access_token).await?;
                (userinfo.sub, userinfo.email)
            }
        };

        // Local accounts are keyed by email; a grant without one falls back
        // to the subject identifier.
        let email = email.unwrap_or_else(|| sub.clone());
        let user = self.users.upsert_by_email(&email).await?;

        // A returning user whose grant belongs to a different remote
        // account is a conflict, not a new login.
        check_identity_conflict(user.member_id.as_deref(), &sub)?;
        let member_id = self.users.set_member_id_if_absent(user.id, &sub).await?;

        let record = self.credentials.store_grant(user.id, &grant).await?;

        tracing::info!(
            user_id = user.id,
            record_id = record.id,
            "Completed authorization callback"
        );

        Ok(CallbackOutcome {
            user_id: user.id,
            expires_in: grant.expires_in,
            has_id_token: grant.id_token.is_some(),
            member_id: Some(member_id),
        })
    }
}
