//! Session-description encryption for rendezvous signaling
//!
//! Offers and answers travel through public trackers. Only the session
//! description is encrypted; topic and peer ids stay readable so the tracker
//! can match peers.
//!
//! ## Envelope
//!
//! ```text
//! {"c": base64(AES-256-CBC(PKCS#7(sdp))), "iv": [16 numbers]}
//! ```
//!
//! The key is `SHA-256("<secret>:<namespace>:<secret>")`.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ChatError, ChatResult};
use crate::types::ShareSecret;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// CBC initialization vector size
pub const IV_SIZE: usize = 16;

/// Ciphertext envelope as it appears inside the `sdp` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSignal {
    /// Base64 ciphertext
    pub c: String,
    /// Initialization vector
    pub iv: [u8; IV_SIZE],
}

/// Per-topic signaling key.
#[derive(Clone)]
pub struct SignalingKey {
    key: [u8; 32],
}

impl std::fmt::Debug for SignalingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SignalingKey(<redacted>)")
    }
}

impl SignalingKey {
    /// Derive the signaling key for a secret under a namespace.
    pub fn derive(secret: &ShareSecret, namespace: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(b":");
        hasher.update(namespace.as_bytes());
        hasher.update(b":");
        hasher.update(secret.as_bytes());
        Self {
            key: hasher.finalize().into(),
        }
    }

    /// Encrypt a session description into a JSON envelope string.
    pub fn seal(&self, plaintext: &str) -> ChatResult<String> {
        let mut iv = [0u8; IV_SIZE];
        rand::rng().fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let envelope = SealedSignal {
            c: BASE64.encode(ciphertext),
            iv,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Decrypt a JSON envelope string produced by [`SignalingKey::seal`].
    pub fn open(&self, sealed: &str) -> ChatResult<String> {
        let envelope: SealedSignal = serde_json::from_str(sealed)
            .map_err(|e| ChatError::DecryptionFailed(format!("malformed envelope: {e}")))?;
        let ciphertext = BASE64
            .decode(envelope.c.as_bytes())
            .map_err(|e| ChatError::DecryptionFailed(format!("bad base64: {e}")))?;

        let plaintext = Aes256CbcDec::new(&self.key.into(), &envelope.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| ChatError::DecryptionFailed(format!("bad padding: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| ChatError::DecryptionFailed(format!("not utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(secret: &[u8]) -> SignalingKey {
        SignalingKey::derive(&ShareSecret::new(secret.to_vec()), "SDP")
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = key(b"topic secret");
        let sdp = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n";
        let sealed = key.seal(sdp).unwrap();
        assert!(!sealed.contains("IN IP4"));
        assert_eq!(key.open(&sealed).unwrap(), sdp);
    }

    #[test]
    fn test_envelope_shape() {
        let sealed = key(b"s").seal("hello").unwrap();
        let value: serde_json::Value = serde_json::from_str(&sealed).unwrap();
        assert!(value["c"].is_string());
        assert_eq!(value["iv"].as_array().unwrap().len(), IV_SIZE);
    }

    #[test]
    fn test_namespace_separates_keys() {
        let secret = ShareSecret::new(b"s".to_vec());
        let sdp_key = SignalingKey::derive(&secret, "SDP");
        let other_key = SignalingKey::derive(&secret, "OTHER");
        let sealed = sdp_key.seal("a longer payload than one block").unwrap();
        assert_ne!(other_key.open(&sealed).ok().as_deref(), Some("a longer payload than one block"));
    }

    #[test]
    fn test_malformed_envelope_is_decryption_error() {
        let key = key(b"s");
        assert!(matches!(key.open("not json"), Err(ChatError::DecryptionFailed(_))));
        assert!(matches!(
            key.open(r#"{"c":"%%%","iv":[0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0]}"#),
            Err(ChatError::DecryptionFailed(_))
        ));
    }
}
