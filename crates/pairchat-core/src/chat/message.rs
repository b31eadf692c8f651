//! The record each party appends to its own log
//!
//! Entries are postcard-encoded [`UserMessage`]s sealed with the
//! conversation's [`CryptoService`]. Short texts are padded so that the
//! sealed entry size says little about the message length.

use serde::{Deserialize, Serialize};

use crate::crypto::CryptoService;
use crate::error::ChatResult;
use crate::types::gen_id;

/// Texts shorter than this many characters are padded up to it.
pub const PADDED_LEN: usize = 100;

/// Length of the per-message nonce, which doubles as the message id.
pub const MESSAGE_NONCE_LEN: usize = 20;

/// Sender name recorded on locally authored messages.
pub const LOCAL_SENDER: &str = "me";

/// A chat message as stored in a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: String,
    /// Unix timestamp in milliseconds taken by the author
    pub sender_timestamp: i64,
    /// Random id, unique per message
    pub nonce: String,
    pub sender: String,
    /// Id of the message this one was written after, if known
    pub after_msg_id: Option<String>,
    /// Filler so that short texts encode to a similar size
    pub padding: String,
}

impl UserMessage {
    /// Create a message stamped with the current time and a fresh nonce.
    pub fn new(text: impl Into<String>, sender: impl Into<String>) -> Self {
        let text = text.into();
        let padding = gen_id(PADDED_LEN.saturating_sub(text.chars().count()));
        Self {
            text,
            sender_timestamp: chrono::Utc::now().timestamp_millis(),
            nonce: gen_id(MESSAGE_NONCE_LEN),
            sender: sender.into(),
            after_msg_id: None,
            padding,
        }
    }

    /// Record the id of the message this one follows.
    pub fn after(mut self, msg_id: impl Into<String>) -> Self {
        self.after_msg_id = Some(msg_id.into());
        self
    }

    pub fn encode(&self) -> ChatResult<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> ChatResult<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// Encode and encrypt into a log entry.
    pub fn seal(&self, crypto: &dyn CryptoService) -> ChatResult<Vec<u8>> {
        crypto.encrypt(&self.encode()?)
    }

    /// Decrypt and decode a log entry.
    pub fn open(crypto: &dyn CryptoService, entry: &[u8]) -> ChatResult<Self> {
        Self::decode(&crypto.decrypt(entry)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EntryCrypto;
    use crate::error::ChatError;
    use crate::types::ShareSecret;

    #[test]
    fn test_short_text_is_padded() {
        let msg = UserMessage::new("hello", LOCAL_SENDER);
        assert_eq!(msg.padding.len(), 95);
        assert_eq!(msg.nonce.len(), MESSAGE_NONCE_LEN);
        assert!(msg.sender_timestamp > 0);
    }

    #[test]
    fn test_long_text_has_no_padding() {
        let msg = UserMessage::new("x".repeat(150), LOCAL_SENDER);
        assert!(msg.padding.is_empty());
    }

    #[test]
    fn test_nonces_differ() {
        let a = UserMessage::new("a", LOCAL_SENDER);
        let b = UserMessage::new("a", LOCAL_SENDER);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_seal_and_open() {
        let crypto = EntryCrypto::derive(&ShareSecret::new(b"secret".to_vec()));
        let msg = UserMessage::new("hi there", LOCAL_SENDER).after("prev");

        let entry = msg.seal(&crypto).unwrap();
        assert_eq!(UserMessage::open(&crypto, &entry).unwrap(), msg);
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let ours = EntryCrypto::derive(&ShareSecret::new(b"ours".to_vec()));
        let theirs = EntryCrypto::derive(&ShareSecret::new(b"theirs".to_vec()));
        let entry = UserMessage::new("hi", LOCAL_SENDER).seal(&ours).unwrap();

        let err = UserMessage::open(&theirs, &entry).unwrap_err();
        assert!(matches!(err, ChatError::DecryptionFailed(_)));
    }
}
