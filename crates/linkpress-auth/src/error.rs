//! Identity and credential lifecycle error types.
//!
//! This module defines all error types that can occur while verifying
//! identity tokens, managing stored credentials, and resolving the remote
//! identity used to author outbound posts.

use std::fmt;

/// Errors that can occur during identity and credential operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A provider endpoint (keys, token, userinfo) was unreachable or kept
    /// failing after the retry budget was exhausted.
    #[error("Provider unavailable: {message}")]
    UpstreamUnavailable {
        /// Description of the upstream failure.
        message: String,
    },

    /// The identity token could not be parsed (bad structure, missing header
    /// fields such as `kid`).
    #[error("Malformed identity token: {message}")]
    MalformedToken {
        /// Description of what was malformed.
        message: String,
    },

    /// The token's key id is not present in the provider's signing key set,
    /// even after a forced key refresh.
    #[error("Unknown signing key: {kid}")]
    UnknownSigningKey {
        /// The key id from the token header.
        kid: String,
    },

    /// The token's signature did not verify.
    #[error("Token verification failed: {message}")]
    SignatureInvalid {
        /// Description of the verification failure. Never the raw token.
        message: String,
    },

    /// The token's `exp` is in the past and expiry checking was not
    /// bypassed. The signature itself verified.
    #[error("Token expired: {message}")]
    TokenExpired {
        /// Description of the expiry failure. Never the raw token.
        message: String,
    },

    /// The token's issuer is not on the allow-list of known issuer variants.
    #[error("Invalid issuer: {issuer}")]
    InvalidIssuer {
        /// The offending issuer value from the token.
        issuer: String,
    },

    /// The expected audience was not among the token's intended audiences.
    #[error("Invalid audience: expected {expected}, found {found}")]
    InvalidAudience {
        /// The audience that was expected.
        expected: String,
        /// The audience value(s) the token actually carries.
        found: String,
    },

    /// No symmetric encryption key is configured for the credential vault.
    /// This is a startup-class misconfiguration.
    #[error("Credential vault misconfigured: {message}")]
    VaultMisconfigured {
        /// Description of the misconfiguration.
        message: String,
    },

    /// A stored ciphertext failed integrity verification or was produced
    /// under a different key. Recoverable by forcing re-login.
    #[error("Stored credential could not be decrypted")]
    CorruptCredential,

    /// No credential record exists for the user.
    #[error("No credential on file for user {user_id}")]
    NoCredential {
        /// The local user id.
        user_id: i64,
    },

    /// The stored credential is expiring and could not be refreshed; the
    /// user must redo the interactive login flow.
    #[error("Re-authentication required: {message}")]
    ReauthRequired {
        /// Description of why the refresh path failed.
        message: String,
    },

    /// The identity backing the live credential disagrees with the identity
    /// persisted for the local user. Never resolved silently.
    #[error("Identity mismatch: stored {stored}, resolved {resolved}")]
    IdentityMismatch {
        /// The identifier persisted for the local user.
        stored: String,
        /// The identifier obtained from the live credential.
        resolved: String,
    },

    /// The anti-forgery state presented on callback was absent, unknown, or
    /// already consumed.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of the state failure.
        message: String,
    },

    /// An error occurred while storing or retrieving auth data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The auth configuration is invalid or incomplete.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `UpstreamUnavailable` error.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `MalformedToken` error.
    #[must_use]
    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: message.into(),
        }
    }

    /// Creates a new `SignatureInvalid` error.
    #[must_use]
    pub fn signature_invalid(message: impl Into<String>) -> Self {
        Self::SignatureInvalid {
            message: message.into(),
        }
    }

    /// Creates a new `TokenExpired` error.
    #[must_use]
    pub fn token_expired(message: impl Into<String>) -> Self {
        Self::TokenExpired {
            message: message.into(),
        }
    }

    /// Creates a new `ReauthRequired` error.
    #[must_use]
    pub fn reauth_required(message: impl Into<String>) -> Self {
        Self::ReauthRequired {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidState` error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `VaultMisconfigured` error.
    #[must_use]
    pub fn vault_misconfigured(message: impl Into<String>) -> Self {
        Self::VaultMisconfigured {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken { .. }
                | Self::UnknownSigningKey { .. }
                | Self::SignatureInvalid { .. }
                | Self::TokenExpired { .. }
                | Self::InvalidIssuer { .. }
                | Self::InvalidAudience { .. }
                | Self::CorruptCredential
                | Self::NoCredential { .. }
                | Self::ReauthRequired { .. }
                | Self::IdentityMismatch { .. }
                | Self::InvalidState { .. }
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns `true` if this is a token verification error.
    #[must_use]
    pub fn is_verification_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken { .. }
                | Self::UnknownSigningKey { .. }
                | Self::SignatureInvalid { .. }
                | Self::TokenExpired { .. }
                | Self::InvalidIssuer { .. }
                | Self::InvalidAudience { .. }
        )
    }

    /// Returns the HTTP status code this error is surfaced as.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::UpstreamUnavailable { .. } => 502,
            Self::MalformedToken { .. }
            | Self::UnknownSigningKey { .. }
            | Self::SignatureInvalid { .. }
            | Self::TokenExpired { .. }
            | Self::InvalidIssuer { .. }
            | Self::InvalidAudience { .. }
            | Self::ReauthRequired { .. }
            | Self::IdentityMismatch { .. } => 401,
            Self::CorruptCredential | Self::NoCredential { .. } | Self::InvalidState { .. } => 400,
            Self::VaultMisconfigured { .. } | Self::Storage { .. } | Self::Configuration { .. } => {
                500
            }
        }
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UpstreamUnavailable { .. } => ErrorCategory::Upstream,
            Self::MalformedToken { .. }
            | Self::UnknownSigningKey { .. }
            | Self::SignatureInvalid { .. }
            | Self::TokenExpired { .. }
            | Self::InvalidIssuer { .. }
            | Self::InvalidAudience { .. } => ErrorCategory::Verification,
            Self::VaultMisconfigured { .. } | Self::Configuration { .. } => {
                ErrorCategory::Configuration
            }
            Self::CorruptCredential
            | Self::NoCredential { .. }
            | Self::ReauthRequired { .. } => ErrorCategory::Credential,
            Self::IdentityMismatch { .. } => ErrorCategory::Identity,
            Self::InvalidState { .. } => ErrorCategory::Flow,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
        }
    }
}

/// Categories of identity/credential errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Provider endpoint failures.
    Upstream,
    /// Identity token verification failures.
    Verification,
    /// Configuration errors (including vault key).
    Configuration,
    /// Stored credential lifecycle errors.
    Credential,
    /// Identity resolution conflicts.
    Identity,
    /// Authorization flow (anti-forgery state) errors.
    Flow,
    /// Storage backend errors.
    Infrastructure,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream => write!(f, "upstream"),
            Self::Verification => write!(f, "verification"),
            Self::Configuration => write!(f, "configuration"),
            Self::Credential => write!(f, "credential"),
            Self::Identity => write!(f, "identity"),
            Self::Flow => write!(f, "flow"),
            Self::Infrastructure => write!(f, "infrastructure"),
        }
    }
}
