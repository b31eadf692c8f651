//! Log synchronization status
//!
//! ```text
//! NotInitialized ──► Initializing ──► Connecting ◄──► Online
//!   (no log)         (learning the     (no peers, or   (every peer
//!                     address/opening)  a peer not      finished its
//!                                       handshaken)     handshake)
//! ```

use std::fmt;

use crate::log::PeerState;

/// Status of one log role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// No log instance and no bootstrap in progress
    #[default]
    NotInitialized,
    /// Learning the log address or opening the log
    Initializing,
    /// Log open; no peer or a peer still handshaking
    Connecting,
    /// Log open and every peer has completed its handshake
    Online,
}

impl SyncStatus {
    /// Derive the status of an open log from its replication sessions.
    pub fn from_peers(peers: &[PeerState]) -> Self {
        if !peers.is_empty() && peers.iter().all(|p| p.remote_opened) {
            SyncStatus::Online
        } else {
            SyncStatus::Connecting
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, SyncStatus::Online)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::NotInitialized => write!(f, "Not initialized"),
            SyncStatus::Initializing => write!(f, "Initializing"),
            SyncStatus::Connecting => write!(f, "Connecting"),
            SyncStatus::Online => write!(f, "Online"),
        }
    }
}
