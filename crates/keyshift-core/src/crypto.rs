//! Value encryption for the unified secrets store.
//!
//! Secret values are sealed with AES-256-GCM before they reach the storage
//! backend. The storage key of the secret is bound in as associated data,
//! so a ciphertext copied under a different key no longer authenticates.
//!
//! Ciphertext format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_CIPHERTEXT_LEN: usize = NONCE_LEN + TAG_LEN;

/// A 256-bit data key, zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey([u8; 32]);

impl DataKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a key from 64 hex characters.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the input is not valid hex or
    /// does not decode to exactly 32 bytes.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let mut raw = hex::decode(encoded.trim()).map_err(|e| CryptoError::InvalidKey {
            reason: e.to_string(),
        })?;
        let result = <[u8; 32]>::try_from(raw.as_slice())
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey {
                reason: format!("expected 32 bytes, got {}", raw.len()),
            });
        raw.zeroize();
        result
    }

    /// Generate a fresh random key from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Short, non-reversible identifier for log lines.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0);
        hex::encode(digest.get(..4).unwrap_or_default())
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Seal `plaintext`, binding `aad` into the authentication tag.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn seal(key: &DataKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = key
        .cipher()
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    let mut combined = Vec::with_capacity(NONCE_LEN.saturating_add(sealed.len()));
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&sealed);
    Ok(combined)
}

/// Open a value produced by [`seal`] with the same `aad`.
///
/// # Errors
///
/// Returns [`CryptoError::CiphertextTooShort`] for truncated input and
/// [`CryptoError::Decryption`] when authentication fails (wrong key, wrong
/// associated data, or tampered bytes).
pub fn open(key: &DataKey, combined: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if combined.len() < MIN_CIPHERTEXT_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: MIN_CIPHERTEXT_LEN,
            actual: combined.len(),
        });
    }

    let (nonce_bytes, sealed) = combined.split_at(NONCE_LEN);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: sealed, aad })
        .map_err(|e| CryptoError::Decryption {
            reason: e.to_string(),
        })
}
