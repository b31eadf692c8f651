//! Append-only replicated log seam
//!
//! The chat core drives a log engine through [`ReplicatedLog`] and creates
//! instances through a [`LogOpener`]. [`MemoryLog`] is an in-process engine
//! used by tests and the demo.

mod memory;

pub use memory::{MemoryLog, MemoryLogOpener, ReplicationMessage, DEFAULT_HANDSHAKE_TIMEOUT};

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::ChatResult;
use crate::types::LogAddress;

/// Replication session identifier, unique per log instance.
pub type SessionId = u64;

/// Activity on a log instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// The instance finished opening
    Ready,
    /// A local entry was appended
    Append,
    /// Entries were sent to a peer
    Upload,
    /// Entries were received from a peer
    Download,
    /// A peer acknowledged entries
    Ack,
    /// Caught up with a peer
    Sync,
    /// A replication session started
    PeerAdd(SessionId),
    /// A replication session completed its handshake
    PeerOpen(SessionId),
    /// A replication session ended
    PeerRemove(SessionId),
}

impl LogEvent {
    /// Whether this event may have changed the entries a reader can see.
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            LogEvent::Append | LogEvent::Upload | LogEvent::Download | LogEvent::Ack | LogEvent::Sync
        )
    }
}

/// Snapshot of one replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    pub session: SessionId,
    /// The remote side completed the handshake
    pub remote_opened: bool,
}

/// Duplex byte stream of one replication session.
///
/// Closing `inbound` ends the session. `outcome` resolves with the session's
/// result; handshake timeouts surface as [`ChatError::Timeout`](crate::ChatError::Timeout).
pub struct ReplicationStream {
    pub session: SessionId,
    pub outbound: mpsc::Receiver<Bytes>,
    pub inbound: mpsc::Sender<Bytes>,
    pub outcome: JoinHandle<ChatResult<()>>,
}

/// An append-only log that can replicate with peers.
pub trait ReplicatedLog: Send + Sync + 'static {
    fn address(&self) -> LogAddress;

    /// Number of entries available locally.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this instance may append (it created the log).
    fn is_writable(&self) -> bool;

    /// Append one entry, returning its position.
    fn append(&self, entry: Vec<u8>) -> BoxFuture<'_, ChatResult<u64>>;

    /// Read entries in `[start, end)`.
    fn get_batch(&self, start: u64, end: u64) -> BoxFuture<'_, ChatResult<Vec<Vec<u8>>>>;

    /// Start a replication session.
    fn replicate(&self, initiator: bool) -> ChatResult<ReplicationStream>;

    /// Current replication sessions.
    fn peers(&self) -> Vec<PeerState>;

    fn subscribe(&self) -> broadcast::Receiver<LogEvent>;

    /// Resolve once the instance is open.
    fn ready(&self) -> BoxFuture<'_, ChatResult<()>>;
}

/// Opens or creates log instances.
pub trait LogOpener: Send + Sync + 'static {
    /// Create a new writable log when `address` is `None`, otherwise open a
    /// replica of the log at `address`.
    fn open(
        &self,
        name: &str,
        address: Option<LogAddress>,
    ) -> BoxFuture<'static, ChatResult<Arc<dyn ReplicatedLog>>>;
}
