//! Credential encryption at rest.
//!
//! Access, refresh, and identity tokens are never persisted in plaintext.
//! [`CredentialVault`] seals each value with AES-256-GCM under a single
//! symmetric key supplied through configuration, and opens stored
//! ciphertexts on read.
//!
//! # Format
//!
//! Ciphertexts travel as base64 over `nonce || ciphertext || tag`, with a
//! fresh random 12-byte nonce per encryption. Equal plaintexts therefore
//! produce different ciphertexts on every call.
//!
//! # Key Material
//!
//! The key is 32 bytes, accepted as hex (64 chars) or base64. A missing or
//! malformed key is a deployment error and fails vault construction with
//! `VaultMisconfigured`; nothing is ever stored unencrypted as a fallback.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::AuthError;

/// AES-GCM nonce size in bytes.
const NONCE_SIZE: usize = 12;

/// Required key size in bytes (AES-256).
const KEY_SIZE: usize = 32;

/// Environment variable holding the vault key.
pub const VAULT_KEY_VAR: &str = "VAULT_KEY";

/// Symmetric vault for credential values.
///
/// Cheap to clone is not a goal; wrap it in an `Arc` and share it between
/// the storage-facing components.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Creates a vault from raw key material.
    ///
    /// # Errors
    ///
    /// Returns `VaultMisconfigured` if the key is not exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, AuthError> {
        if key.len() != KEY_SIZE {
            return Err(AuthError::vault_misconfigured(format!(
                "vault key must be {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Creates a vault from an encoded key string (hex or base64).
    ///
    /// # Errors
    ///
    /// Returns `VaultMisconfigured` if the string decodes to the wrong
    /// length or is neither valid hex nor valid base64.
    pub fn from_encoded_key(encoded: &str) -> Result<Self, AuthError> {
        let key = parse_key(encoded)?;
        Self::new(&key)
    }

    /// Creates a vault from the `VAULT_KEY` environment variable.
    ///
    /// # Errors
    ///
    /// Returns `VaultMisconfigured` if the variable is absent or its value
    /// is not a valid key.
    pub fn from_env() -> Result<Self, AuthError> {
        let encoded = std::env::var(VAULT_KEY_VAR)
            .map_err(|_| AuthError::vault_misconfigured(format!("{VAULT_KEY_VAR} is not set")))?;
        Self::from_encoded_key(&encoded)
    }

    /// Encrypts a credential value for storage.
    ///
    /// # Errors
    ///
    /// Returns `VaultMisconfigured` if encryption itself fails, which with a
    /// valid key does not happen.
    pub fn seal(&self, plaintext: &str) -> Result<String, AuthError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| AuthError::vault_misconfigured(format!("encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// Decrypts a stored credential value.
    ///
    /// # Errors
    ///
    /// Returns `CorruptCredential` if the ciphertext is malformed, was
    /// tampered with, or was produced under a different key. The error
    /// carries no key or ciphertext material.
    pub fn open(&self, sealed: &str) -> Result<String, AuthError> {
        let combined = BASE64
            .decode(sealed)
            .map_err(|_| AuthError::CorruptCredential)?;

        if combined.len() < NONCE_SIZE {
            return Err(AuthError::CorruptCredential);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AuthError::CorruptCredential)?;

        String::from_utf8(plaintext).map_err(|_| AuthError::CorruptCredential)
    }

    /// Generates a fresh random key, hex-encoded, for provisioning.
    #[must_use]
    pub fn generate_key() -> String {
        use rand::RngCore;
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }
}

/// Parses key material from hex or base64.
fn parse_key(encoded: &str) -> Result<Vec<u8>, AuthError> {
    let trimmed = encoded.trim();

    if trimmed.len() == KEY_SIZE * 2
        && let Ok(key) = hex::decode(trimmed)
    {
        return Ok(key);
    }

    if let Ok(key) = BASE64.decode(trimmed) {
        if key.len() == KEY_SIZE {
            return Ok(key);
        }
        return Err(AuthError::vault_misconfigured(format!(
            "vault key decodes to {} bytes, expected {KEY_SIZE}",
            key.len()
        )));
    }

    Err(AuthError::vault_misconfigured(
        "vault key is neither valid hex nor valid base64",
    ))
}
