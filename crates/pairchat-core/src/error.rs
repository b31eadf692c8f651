//! Error types for pairchat

use thiserror::Error;

/// Main error type for pairchat operations
#[derive(Error, Debug)]
pub enum ChatError {
    /// Rendezvous (tracker) connection failed or was refused
    #[error("Tracker error: {0}")]
    Tracker(String),

    /// Peer negotiation failed (offer/answer exchange)
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Malformed or unexpected protocol input
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Decryption failed (wrong key, tampered data, or malformed input)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Replicated log operation failed
    #[error("Log error: {0}")]
    Log(String),

    /// Operation invoked before its prerequisite exists
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An operation did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Peer transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The component or channel was already shut down
    #[error("Closed: {0}")]
    Closed(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether this error belongs to the timeout class that the replication
    /// retry policy reacts to.
    pub fn is_timeout(&self) -> bool {
        match self {
            ChatError::Timeout(_) => true,
            ChatError::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<postcard::Error> for ChatError {
    fn from(e: postcard::Error) -> Self {
        ChatError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Serialization(e.to_string())
    }
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;
