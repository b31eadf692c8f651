//! Log entry encryption using ChaCha20-Poly1305 AEAD
//!
//! Each conversation has one entry key, derived from the shared secret with
//! HKDF-SHA256. Both parties derive the same key, so either can read both logs.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use super::CryptoService;
use crate::error::{ChatError, ChatResult};
use crate::types::ShareSecret;

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

const ENTRY_KEY_SALT: &[u8] = b"pairchat-entry-salt-v1";
const ENTRY_KEY_INFO: &[u8] = b"pairchat-entry-key";

/// Entry cipher for one conversation.
///
/// # Wire Format
///
/// Encrypted data format: `[nonce (12 bytes)] + [ciphertext + auth_tag (16 bytes)]`
///
/// # Example
///
/// ```
/// use pairchat_core::crypto::{CryptoService, EntryCrypto};
/// use pairchat_core::ShareSecret;
///
/// let crypto = EntryCrypto::derive(&ShareSecret::new(b"shared".to_vec()));
/// let sealed = crypto.encrypt(b"hi").unwrap();
/// assert_eq!(crypto.decrypt(&sealed).unwrap(), b"hi");
/// ```
pub struct EntryCrypto {
    cipher: ChaCha20Poly1305,
}

impl EntryCrypto {
    /// Create an instance with the given 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Derive the entry key for a shared secret.
    pub fn derive(secret: &ShareSecret) -> Self {
        Self::new(&Self::derive_key(secret))
    }

    /// Derive the raw 32-byte entry key.
    pub fn derive_key(secret: &ShareSecret) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(Some(ENTRY_KEY_SALT), secret.as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(ENTRY_KEY_INFO, &mut okm)
            .expect("HKDF expand should never fail with 32-byte output");
        okm
    }
}

impl CryptoService for EntryCrypto {
    fn encrypt(&self, plaintext: &[u8]) -> ChatResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| ChatError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut result = nonce_bytes.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> ChatResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(ChatError::DecryptionFailed(
                "data too short to contain nonce".to_string(),
            ));
        }

        let (nonce, encrypted) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), encrypted)
            .map_err(|e| ChatError::DecryptionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto(secret: &[u8]) -> EntryCrypto {
        EntryCrypto::derive(&ShareSecret::new(secret.to_vec()))
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let crypto = crypto(b"shared secret");
        let ciphertext = crypto.encrypt(b"Hello, World!").unwrap();
        assert_eq!(crypto.decrypt(&ciphertext).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_both_parties_derive_same_key() {
        let secret = ShareSecret::new(b"agreed".to_vec());
        assert_eq!(EntryCrypto::derive_key(&secret), EntryCrypto::derive_key(&secret.clone()));

        let alice = EntryCrypto::derive(&secret);
        let bob = EntryCrypto::derive(&secret);
        let sealed = alice.encrypt(b"from alice").unwrap();
        assert_eq!(bob.decrypt(&sealed).unwrap(), b"from alice");
    }

    #[test]
    fn test_same_plaintext_different_ciphertext() {
        let crypto = crypto(b"k");
        let c1 = crypto.encrypt(b"same").unwrap();
        let c2 = crypto.encrypt(b"same").unwrap();
        assert_ne!(c1, c2);
        assert!(c1.len() >= 4 + NONCE_SIZE + 16);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = crypto(b"one").encrypt(b"Secret").unwrap();
        let result = crypto(b"two").decrypt(&sealed);
        assert!(matches!(result, Err(ChatError::DecryptionFailed(_))));
    }

    #[test]
    fn test_tampered_data_fails() {
        let crypto = crypto(b"k");
        let mut sealed = crypto.encrypt(b"Original message").unwrap();
        sealed[NONCE_SIZE] ^= 0xFF;
        assert!(crypto.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_truncated_data_fails() {
        let crypto = crypto(b"k");
        let sealed = crypto.encrypt(b"Original message").unwrap();
        let result = crypto.decrypt(&sealed[..5]);
        match result {
            Err(ChatError::DecryptionFailed(msg)) => assert!(msg.contains("too short")),
            other => panic!("expected DecryptionFailed, got {:?}", other),
        }
    }
}
