//! Encrypted-at-rest storage for hidden variable strings.
//!
//! `spec.md` 9 flags the source engine's use of the Windows
//! DPAPI-adjacent `CryptProtectMemory` for this job as needing
//! re-architecture for portability. This module follows that redesign
//! flag literally: an authenticated-encryption scheme
//! (ChaCha20-Poly1305, via the `chacha20poly1305` crate) keyed by a
//! random key generated once per process, with plaintext held in
//! `zeroize`'s `Zeroizing` wrapper so every exit path -- including
//! panics -- scrubs the plaintext from memory, per `spec.md` 4.2's
//! "Uninitializing MUST zero the plaintext memory on all exit paths."

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{EngineError, Result};

const NONCE_LEN: usize = 12;

/// Holds the per-process encryption key used for hidden variable
/// values. One instance is created per [`super::VariableStore`] and
/// shared by every hidden [`super::Variable`] it owns.
pub struct VariableCipher {
    cipher: ChaCha20Poly1305,
}

impl VariableCipher {
    /// Generates a fresh random key for this process.
    #[must_use]
    pub fn new() -> Self {
        let mut key_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut key_bytes);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
        Self { cipher }
    }

    /// Encrypts `plaintext`, returning a self-contained blob (random
    /// nonce prefix + ciphertext) suitable for storage in
    /// [`EncryptedString`].
    ///
    /// # Errors
    /// Returns [`EngineError::Unexpected`] if the underlying AEAD
    /// operation fails (it cannot in practice with this key/nonce
    /// combination, but the signature stays fallible to mirror the
    /// source's checked `CryptProtectMemory` call).
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| EngineError::Unexpected {
                detail: "failed to encrypt hidden variable value".to_string(),
            })?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypts a blob produced by [`Self::encrypt`] back to plaintext,
    /// held in a [`Zeroizing`] wrapper so it is scrubbed on drop.
    ///
    /// # Errors
    /// Returns [`EngineError::Unexpected`] if the blob is too short to
    /// contain a nonce, authentication fails, or the plaintext is not
    /// valid UTF-8.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Zeroizing<String>> {
        if blob.len() < NONCE_LEN {
            return Err(EngineError::Unexpected {
                detail: "encrypted variable blob too short".to_string(),
            });
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext_bytes =
            self.cipher
                .decrypt(nonce, ciphertext)
                .map_err(|_| EngineError::Unexpected {
                    detail: "failed to decrypt hidden variable value".to_string(),
                })?;
        let plaintext = String::from_utf8(plaintext_bytes).map_err(|_| EngineError::Unexpected {
            detail: "decrypted hidden variable value was not valid UTF-8".to_string(),
        })?;
        Ok(Zeroizing::new(plaintext))
    }
}

impl Default for VariableCipher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = VariableCipher::new();
        let blob = cipher.encrypt("super-secret-value").unwrap();
        assert_ne!(blob, b"super-secret-value".to_vec());
        let plaintext = cipher.decrypt(&blob).unwrap();
        assert_eq!(&*plaintext, "super-secret-value");
    }

    #[test]
    fn different_ciphers_cannot_decrypt_each_others_blobs() {
        let a = VariableCipher::new();
        let b = VariableCipher::new();
        let blob = a.encrypt("value").unwrap();
        assert!(b.decrypt(&blob).is_err());
    }

    #[test]
    fn tampered_blob_fails_authentication() {
        let cipher = VariableCipher::new();
        let mut blob = cipher.encrypt("value").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(cipher.decrypt(&blob).is_err());
    }
}
