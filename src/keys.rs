// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custodial key encryption at rest.
//!
//! Wallet records carry their private key sealed with XChaCha20-Poly1305
//! under a single key-encryption key. The stored form is
//! `base64(nonce[24] || ciphertext || tag[16])`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

/// Errors opening a sealed key. Messages never contain key material.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecryptionError {
    #[error("invalid key-encryption key: {0}")]
    InvalidKey(String),

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("authentication failed")]
    Authentication,

    #[error("encryption failed")]
    Encryption,
}

/// Turns a stored ciphertext back into private key material.
pub trait KeyDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<Zeroizing<String>, DecryptionError>;
}

/// XChaCha20-Poly1305 cipher for wallet private keys.
pub struct SealedKeyCipher {
    cipher: XChaCha20Poly1305,
}

impl SealedKeyCipher {
    /// Build from raw key bytes (must be 32 bytes).
    pub fn new(key: &[u8]) -> Result<Self, DecryptionError> {
        if key.len() != KEY_LEN {
            return Err(DecryptionError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let key = Key::from_slice(key);
        Ok(Self {
            cipher: XChaCha20Poly1305::new(key),
        })
    }

    /// Build from a base64-encoded 32-byte key, as supplied in configuration.
    pub fn from_base64(encoded: &str) -> Result<Self, DecryptionError> {
        let key = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|e| DecryptionError::InvalidKey(format!("not base64: {e}")))?,
        );
        Self::new(&key)
    }

    /// Seal plaintext key material for storage.
    pub fn seal(&self, plaintext: &str) -> Result<String, DecryptionError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| DecryptionError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }
}

impl KeyDecryptor for SealedKeyCipher {
    fn decrypt(&self, ciphertext: &str) -> Result<Zeroizing<String>, DecryptionError> {
        let sealed = BASE64
            .decode(ciphertext.trim())
            .map_err(|e| DecryptionError::Malformed(format!("not base64: {e}")))?;

        if sealed.len() <= NONCE_LEN {
            return Err(DecryptionError::Malformed("ciphertext too short".to_string()));
        }
        let (nonce, body) = sealed.split_at(NONCE_LEN);

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(XNonce::from_slice(nonce), body)
                .map_err(|_| DecryptionError::Authentication)?,
        );

        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| DecryptionError::Malformed("plaintext is not UTF-8".to_string()))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}
