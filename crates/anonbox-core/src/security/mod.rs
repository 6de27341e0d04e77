//! Payload encryption with a key derived from a shared passphrase.
//!
//! # How it works (for beginners)
//!
//! Every node on a LAN that should be able to read each other's messages is
//! started with the same passphrase.  The passphrase is hashed with SHA-256 to
//! obtain a 32-byte key, and each payload is sealed with AES-256-GCM:
//!
//! ```text
//! sealed = nonce(12 random bytes) || ciphertext || tag(16 bytes)
//! ```
//!
//! AES-GCM is an *AEAD* cipher: besides hiding the content, the tag lets the
//! receiver detect any modification.  Flipping a single bit anywhere in the
//! sealed bytes (nonce included) makes [`SecurityContext::decrypt`] fail with
//! [`SecurityError::Authentication`] instead of returning garbage.
//!
//! # Passthrough mode
//!
//! Without a passphrase there is no key and both directions are the identity
//! transform.  Such a node can only talk to other passphrase-less nodes.
//!
//! # Key derivation
//!
//! The key is a single unsalted SHA-256 of the UTF-8 passphrase bytes.  This
//! is weak against offline guessing, but it is what every other instance of
//! the protocol computes, so changing it would break interoperability.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of the random AES-GCM nonce prepended to every sealed payload.
pub const NONCE_LEN: usize = 12;

/// Length of the AES-GCM authentication tag appended by the cipher.
pub const TAG_LEN: usize = 16;

/// Length of the derived symmetric key.
pub const KEY_LEN: usize = 32;

/// Errors produced by the security layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecurityError {
    /// The sealed payload is too short or its tag does not verify.
    #[error("authentication failed: {0}")]
    Authentication(&'static str),

    /// The cipher refused to seal the payload.
    #[error("encryption failed")]
    Encryption,
}

/// Derives the 32-byte symmetric key for `passphrase`.
///
/// Deterministic and unsalted: the same passphrase always yields the same key.
pub fn derive_key(passphrase: &str) -> [u8; KEY_LEN] {
    Sha256::digest(passphrase.as_bytes()).into()
}

/// Holds the optional process-wide key and seals/opens payloads with it.
#[derive(Clone)]
pub struct SecurityContext {
    cipher: Option<Aes256Gcm>,
}

impl SecurityContext {
    /// A context without a key; `encrypt` and `decrypt` pass bytes through.
    pub fn passthrough() -> Self {
        Self { cipher: None }
    }

    /// A context using an explicit key.
    pub fn with_key(key: [u8; KEY_LEN]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Self {
            cipher: Some(cipher),
        }
    }

    /// Builds a context from an optional passphrase.
    ///
    /// `None` or an empty string selects passthrough mode.
    pub fn from_passphrase(passphrase: Option<&str>) -> Self {
        match passphrase {
            Some(p) if !p.is_empty() => Self::with_key(derive_key(p)),
            _ => Self::passthrough(),
        }
    }

    /// Returns `true` when a key is configured.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Seals `plaintext`, returning `nonce || ciphertext || tag`.
    ///
    /// A fresh random nonce is drawn for every call.  In passthrough mode the
    /// input is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::Encryption`] if the cipher rejects the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let Some(cipher) = &self.cipher else {
            return Ok(plaintext.to_vec());
        };

        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| SecurityError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Opens a payload produced by [`SecurityContext::encrypt`].
    ///
    /// In passthrough mode the input is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::Authentication`] if the input is shorter than
    /// the nonce or the tag does not verify (wrong key or tampered bytes).
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let Some(cipher) = &self.cipher else {
            return Ok(sealed.to_vec());
        };

        if sealed.len() < NONCE_LEN {
            return Err(SecurityError::Authentication("payload shorter than nonce"));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SecurityError::Authentication("tag mismatch"))
    }
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("SecurityContext")
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
