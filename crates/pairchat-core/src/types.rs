//! Core types for pairchat

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ChatError, ChatResult};

/// Alphabet for generated identifiers. Safe inside JSON and URLs.
const ID_CHARSET: &[u8] = b"0123456789AaBbCcDdEeFfGgHhIiJjKkLlMmNnOoPpQqRrSsTtUuVvWwXxYyZz";

/// Length of peer ids, offer ids and announce topics.
pub const ID_LEN: usize = 20;

/// Generate a random identifier of `len` characters from the id alphabet.
pub fn gen_id(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ID_CHARSET[rng.random_range(0..ID_CHARSET.len())] as char)
        .collect()
}

/// Identifier a node presents to rendezvous servers and peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a new random PeerId
    pub fn random() -> Self {
        Self(gen_id(ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a single connection offer inside an announcement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferId(String);

impl OfferId {
    pub fn random() -> Self {
        Self(gen_id(ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OfferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret agreed out-of-band between the two parties.
///
/// Never serialized and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ShareSecret(Vec<u8>);

impl ShareSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ShareSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareSecret(<{} bytes>)", self.0.len())
    }
}

/// Public identifier under which both parties announce themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnounceTopic(String);

impl AnnounceTopic {
    /// Derive the topic for a secret.
    ///
    /// ```text
    /// topic = base36_per_byte(SHA-256(secret ":" app_id ":" version ":" secret))[..20]
    /// ```
    pub fn derive(secret: &ShareSecret, app_id: &str, protocol_version: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(b":");
        hasher.update(app_id.as_bytes());
        hasher.update(b":");
        hasher.update(protocol_version.as_bytes());
        hasher.update(b":");
        hasher.update(secret.as_bytes());
        let digest = hasher.finalize();

        let mut topic = String::with_capacity(digest.len() * 2);
        for byte in digest.iter() {
            push_base36(&mut topic, *byte);
        }
        topic.truncate(ID_LEN);
        Self(topic)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AnnounceTopic {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for AnnounceTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn push_base36(out: &mut String, byte: u8) {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let hi = byte / 36;
    let lo = byte % 36;
    if hi > 0 {
        out.push(DIGITS[hi as usize] as char);
    }
    out.push(DIGITS[lo as usize] as char);
}

/// Which side of the conversation a message or log belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantTag(pub u8);

/// Public key (address) of a replicated log.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogAddress(pub [u8; 32]);

impl LogAddress {
    /// Create a new random address
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse an address from a byte slice of exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> ChatResult<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            ChatError::Protocol(format!("log address must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> ChatResult<Self> {
        let bytes = hex::decode(s).map_err(|e| ChatError::Protocol(format!("bad address hex: {e}")))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for LogAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogAddress({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for LogAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Address of a log that may not be known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogAddressState {
    #[default]
    Unresolved,
    Resolved(LogAddress),
}

impl LogAddressState {
    pub fn resolved(&self) -> Option<LogAddress> {
        match self {
            LogAddressState::Unresolved => None,
            LogAddressState::Resolved(addr) => Some(*addr),
        }
    }
}

impl From<Option<LogAddress>> for LogAddressState {
    fn from(addr: Option<LogAddress>) -> Self {
        addr.map_or(LogAddressState::Unresolved, LogAddressState::Resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_id_length_and_alphabet() {
        let id = gen_id(ID_LEN);
        assert_eq!(id.len(), ID_LEN);
        assert!(id.bytes().all(|b| ID_CHARSET.contains(&b)));
    }

    #[test]
    fn test_topic_is_deterministic() {
        let secret = ShareSecret::new(b"correct horse".to_vec());
        let a = AnnounceTopic::derive(&secret, "pairchat", "0.1.0");
        let b = AnnounceTopic::derive(&secret, "pairchat", "0.1.0");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), ID_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_topic_depends_on_all_inputs() {
        let secret = ShareSecret::new(b"correct horse".to_vec());
        let base = AnnounceTopic::derive(&secret, "pairchat", "0.1.0");
        assert_ne!(base, AnnounceTopic::derive(&ShareSecret::new(b"battery".to_vec()), "pairchat", "0.1.0"));
        assert_ne!(base, AnnounceTopic::derive(&secret, "otherapp", "0.1.0"));
        assert_ne!(base, AnnounceTopic::derive(&secret, "pairchat", "0.2.0"));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = ShareSecret::new(b"hunter2".to_vec());
        let printed = format!("{:?}", secret);
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_log_address_hex_roundtrip_and_length_check() {
        let addr = LogAddress::random();
        assert_eq!(LogAddress::from_hex(&addr.to_hex()).unwrap(), addr);
        assert!(LogAddress::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_address_state_from_option() {
        assert_eq!(LogAddressState::from(None), LogAddressState::Unresolved);
        let addr = LogAddress::random();
        assert_eq!(LogAddressState::from(Some(addr)).resolved(), Some(addr));
    }
}
