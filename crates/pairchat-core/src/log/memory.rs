//! In-memory replicated log
//!
//! Replication runs a small message protocol over the session stream:
//!
//! ```text
//!  Handshake{address, length} ──►        (re-sent once on first remote handshake)
//!  Have{length}               ──►        after every local append
//!  Request{start, end}        ──►        replica behind the remote length
//!  Data{start, entries}       ──►        answer to a request
//!  Ack{length}                ──►        replica stored the data
//! ```
//!
//! Only the writable instance serves data; replicas only download.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use super::{LogEvent, LogOpener, PeerState, ReplicatedLog, ReplicationStream, SessionId};
use crate::error::{ChatError, ChatResult};
use crate::mux::STAGE_CAPACITY;
use crate::types::LogAddress;

/// Default time a replication session waits for the remote handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Messages of the replication protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationMessage {
    Handshake { address: LogAddress, length: u64 },
    Have { length: u64 },
    Request { start: u64, end: u64 },
    Data { start: u64, entries: Vec<Vec<u8>> },
    Ack { length: u64 },
}

impl ReplicationMessage {
    pub fn encode(&self) -> ChatResult<Bytes> {
        Ok(Bytes::from(postcard::to_allocvec(self)?))
    }

    pub fn decode(data: &[u8]) -> ChatResult<Self> {
        Ok(postcard::from_bytes(data)?)
    }
}

struct LogInner {
    name: String,
    address: LogAddress,
    writable: bool,
    entries: RwLock<Vec<Vec<u8>>>,
    peers: Mutex<HashMap<SessionId, PeerState>>,
    next_session: AtomicU64,
    event_tx: broadcast::Sender<LogEvent>,
    handshake_timeout: Duration,
}

/// In-memory [`ReplicatedLog`].
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<LogInner>,
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLog")
            .field("name", &self.inner.name)
            .field("address", &self.inner.address)
            .field("writable", &self.inner.writable)
            .field("len", &self.len())
            .finish()
    }
}

impl MemoryLog {
    /// Create a new writable log with a fresh address.
    pub fn create(name: &str, handshake_timeout: Duration) -> Self {
        Self::build(name, LogAddress::random(), true, handshake_timeout)
    }

    /// Open an empty replica of the log at `address`.
    pub fn replica(name: &str, address: LogAddress, handshake_timeout: Duration) -> Self {
        Self::build(name, address, false, handshake_timeout)
    }

    fn build(name: &str, address: LogAddress, writable: bool, handshake_timeout: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(LogInner {
                name: name.to_string(),
                address,
                writable,
                entries: RwLock::new(Vec::new()),
                peers: Mutex::new(HashMap::new()),
                next_session: AtomicU64::new(1),
                event_tx,
                handshake_timeout,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn emit(&self, event: LogEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    fn append_sync(&self, entry: Vec<u8>) -> u64 {
        let position = {
            let mut entries = self.inner.entries.write();
            entries.push(entry);
            entries.len() as u64 - 1
        };
        self.emit(LogEvent::Append);
        position
    }

    /// Store downloaded entries starting at `start`. Returns the new length.
    fn store_download(&self, start: u64, downloaded: Vec<Vec<u8>>) -> u64 {
        let mut entries = self.inner.entries.write();
        let len = entries.len() as u64;
        if start > len {
            return len;
        }
        let skip = (len - start) as usize;
        entries.extend(downloaded.into_iter().skip(skip));
        entries.len() as u64
    }

    fn slice(&self, start: u64, end: u64) -> Vec<Vec<u8>> {
        let entries = self.inner.entries.read();
        let end = (end as usize).min(entries.len());
        let start = (start as usize).min(end);
        entries[start..end].to_vec()
    }

    fn set_peer_opened(&self, session: SessionId) {
        if let Some(peer) = self.inner.peers.lock().get_mut(&session) {
            peer.remote_opened = true;
        }
    }

    async fn run_session(
        self,
        session: SessionId,
        initiator: bool,
        out_tx: mpsc::Sender<Bytes>,
        mut in_rx: mpsc::Receiver<Bytes>,
    ) -> ChatResult<()> {
        let mut local_events = self.inner.event_tx.subscribe();
        let handshake = ReplicationMessage::Handshake {
            address: self.inner.address,
            length: self.len(),
        };
        send(&out_tx, &handshake).await?;

        // Wait for the remote handshake
        let deadline = tokio::time::sleep(self.inner.handshake_timeout);
        tokio::pin!(deadline);
        let remote_len = loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(ChatError::Timeout(format!(
                        "replication handshake on {} (session {session})",
                        self.inner.name
                    )));
                }
                frame = in_rx.recv() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    match ReplicationMessage::decode(&frame) {
                        Ok(ReplicationMessage::Handshake { address, length }) => {
                            if address != self.inner.address {
                                return Err(ChatError::Protocol(format!(
                                    "replication peer has log {address:?}, expected {:?}",
                                    self.inner.address
                                )));
                            }
                            break length;
                        }
                        Ok(other) => trace!(?other, "Message before handshake"),
                        Err(e) => debug!(error = %e, "Dropping undecodable replication frame"),
                    }
                }
            }
        };

        // The first handshake may have been sent before the remote listened
        let handshake = ReplicationMessage::Handshake {
            address: self.inner.address,
            length: self.len(),
        };
        send(&out_tx, &handshake).await?;

        self.set_peer_opened(session);
        self.emit(LogEvent::PeerOpen(session));
        debug!(log = %self.inner.name, session, initiator, remote_len, "Replication handshake complete");

        let mut requested_to = self.request_missing(&out_tx, remote_len, 0).await?;

        loop {
            tokio::select! {
                frame = in_rx.recv() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    let msg = match ReplicationMessage::decode(&frame) {
                        Ok(msg) => msg,
                        Err(e) => {
                            debug!(error = %e, "Dropping undecodable replication frame");
                            continue;
                        }
                    };
                    match msg {
                        ReplicationMessage::Handshake { .. } => {}
                        ReplicationMessage::Have { length } => {
                            requested_to = self.request_missing(&out_tx, length, requested_to).await?;
                        }
                        ReplicationMessage::Request { start, end } => {
                            if !self.inner.writable {
                                continue;
                            }
                            let entries = self.slice(start, end);
                            if entries.is_empty() {
                                continue;
                            }
                            send(&out_tx, &ReplicationMessage::Data { start, entries }).await?;
                            self.emit(LogEvent::Upload);
                        }
                        ReplicationMessage::Data { start, entries } => {
                            if self.inner.writable {
                                continue;
                            }
                            let length = self.store_download(start, entries);
                            self.emit(LogEvent::Download);
                            send(&out_tx, &ReplicationMessage::Ack { length }).await?;
                            if length >= requested_to {
                                self.emit(LogEvent::Sync);
                            }
                        }
                        ReplicationMessage::Ack { .. } => self.emit(LogEvent::Ack),
                    }
                }
                event = local_events.recv() => match event {
                    Ok(LogEvent::Append) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.inner.writable {
                            send(&out_tx, &ReplicationMessage::Have { length: self.len() }).await?;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    /// Ask for entries up to `remote_len` not yet requested. Returns the new
    /// request watermark.
    async fn request_missing(
        &self,
        out_tx: &mpsc::Sender<Bytes>,
        remote_len: u64,
        requested_to: u64,
    ) -> ChatResult<u64> {
        if self.inner.writable {
            return Ok(requested_to);
        }
        let start = self.len().max(requested_to);
        if remote_len <= start {
            return Ok(requested_to);
        }
        send(out_tx, &ReplicationMessage::Request { start, end: remote_len }).await?;
        Ok(remote_len)
    }
}

async fn send(out_tx: &mpsc::Sender<Bytes>, msg: &ReplicationMessage) -> ChatResult<()> {
    out_tx
        .send(msg.encode()?)
        .await
        .map_err(|_| ChatError::Closed("replication stream".to_string()))
}

impl ReplicatedLog for MemoryLog {
    fn address(&self) -> LogAddress {
        self.inner.address
    }

    fn len(&self) -> u64 {
        self.inner.entries.read().len() as u64
    }

    fn is_writable(&self) -> bool {
        self.inner.writable
    }

    fn append(&self, entry: Vec<u8>) -> BoxFuture<'_, ChatResult<u64>> {
        Box::pin(async move {
            if !self.inner.writable {
                return Err(ChatError::InvalidState(format!("log {} is read-only", self.inner.name)));
            }
            Ok(self.append_sync(entry))
        })
    }

    fn get_batch(&self, start: u64, end: u64) -> BoxFuture<'_, ChatResult<Vec<Vec<u8>>>> {
        Box::pin(async move {
            let len = self.len();
            if start > end || end > len {
                return Err(ChatError::Log(format!(
                    "range {start}..{end} out of bounds for length {len}"
                )));
            }
            Ok(self.slice(start, end))
        })
    }

    fn replicate(&self, initiator: bool) -> ChatResult<ReplicationStream> {
        let session = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let (out_tx, out_rx) = mpsc::channel(STAGE_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(STAGE_CAPACITY);

        self.inner.peers.lock().insert(
            session,
            PeerState {
                session,
                remote_opened: false,
            },
        );
        self.emit(LogEvent::PeerAdd(session));

        let log = self.clone();
        let outcome = tokio::spawn(async move {
            let result = log.clone().run_session(session, initiator, out_tx, in_rx).await;
            log.inner.peers.lock().remove(&session);
            log.emit(LogEvent::PeerRemove(session));
            if let Err(e) = &result {
                warn!(log = %log.inner.name, session, error = %e, "Replication session failed");
            }
            result
        });

        Ok(ReplicationStream {
            session,
            outbound: out_rx,
            inbound: in_tx,
            outcome,
        })
    }

    fn peers(&self) -> Vec<PeerState> {
        self.inner.peers.lock().values().copied().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.inner.event_tx.subscribe()
    }

    fn ready(&self) -> BoxFuture<'_, ChatResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// [`LogOpener`] producing [`MemoryLog`] instances.
#[derive(Debug, Clone)]
pub struct MemoryLogOpener {
    handshake_timeout: Duration,
}

impl Default for MemoryLogOpener {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl MemoryLogOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handshake_timeout(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl LogOpener for MemoryLogOpener {
    fn open(
        &self,
        name: &str,
        address: Option<LogAddress>,
    ) -> BoxFuture<'static, ChatResult<Arc<dyn ReplicatedLog>>> {
        let log = match address {
            Some(address) => MemoryLog::replica(name, address, self.handshake_timeout),
            None => MemoryLog::create(name, self.handshake_timeout),
        };
        debug!(log = name, address = %log.address(), writable = log.is_writable(), "Opened memory log");
        Box::pin(async move {
            log.emit(LogEvent::Ready);
            Ok(Arc::new(log) as Arc<dyn ReplicatedLog>)
        })
    }
}
