//! Symmetric crypto used by the chat core
//!
//! Two independent keys are derived from the shared secret:
//!
//! - **Entry key**: encrypts log entries ([`EntryCrypto`], ChaCha20-Poly1305)
//! - **Signaling key**: encrypts session descriptions relayed through
//!   rendezvous servers ([`SignalingKey`], AES-256-CBC)
//!
//! Log consumers only see the [`CryptoService`] trait so the entry cipher can
//! be swapped without touching the view or session code.

mod entry;
mod signaling;

pub use entry::{EntryCrypto, NONCE_SIZE};
pub use signaling::{SealedSignal, SignalingKey, IV_SIZE};

use crate::error::ChatResult;

/// Encrypt/decrypt service injected into components that read or write log
/// entries.
pub trait CryptoService: Send + Sync + 'static {
    /// Encrypt a plaintext record.
    fn encrypt(&self, plaintext: &[u8]) -> ChatResult<Vec<u8>>;

    /// Decrypt a record produced by [`CryptoService::encrypt`] under the same key.
    fn decrypt(&self, ciphertext: &[u8]) -> ChatResult<Vec<u8>>;
}
