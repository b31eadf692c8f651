//! Per-log synchronization engine
//!
//! One engine drives one directional log. For every registered peer it runs a
//! pipeline task:
//!
//! ```text
//! register_peer(conn, remote)
//!   │
//!   ├─ replica without log ─► receive_address (control channel) ─► initialize
//!   ├─ origin ─────────────► initialize ─► lighthouse (until handshake)
//!   │
//!   └─ replicate:  log.replicate() ─► wrap(UserChannel, idx) ─► conn
//!                  conn ─► unwrap(UserChannel, idx) ─► log
//!                  timeout while conn open ─► retry (bounded)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bootstrap::{receive_address, run_lighthouse};
use super::status::SyncStatus;
use crate::config::SyncConfig;
use crate::error::{ChatError, ChatResult};
use crate::log::{LogEvent, LogOpener, ReplicatedLog, ReplicationStream};
use crate::mux::{channel_index, spawn_unwrap, spawn_wrap, ChannelKind, ChannelTag};
use crate::transport::PeerConnection;
use crate::types::{LogAddress, LogAddressState, PeerId};

/// Which side of a log this engine is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRole {
    /// This side created the log and writes to it
    Origin,
    /// This side reads a copy of the remote's log
    Replica,
}

struct PeerPipeline {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct EngineInner {
    channel_name: String,
    role: LogRole,
    local_id: PeerId,
    config: SyncConfig,
    opener: Arc<dyn LogOpener>,
    log: RwLock<Option<Arc<dyn ReplicatedLog>>>,
    address: Mutex<LogAddressState>,
    init_lock: tokio::sync::Mutex<()>,
    peers: Mutex<HashMap<PeerId, PeerPipeline>>,
    next_generation: Mutex<u64>,
    status_tx: watch::Sender<SyncStatus>,
    status_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

/// Synchronizes one log with every registered peer.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine for the log named `channel_name`.
    ///
    /// A replica may be given an already known `address`; otherwise it
    /// learns it from the first peer's lighthouse.
    pub fn new(
        channel_name: impl Into<String>,
        role: LogRole,
        local_id: PeerId,
        address: LogAddressState,
        opener: Arc<dyn LogOpener>,
        config: SyncConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::NotInitialized);
        Self {
            inner: Arc::new(EngineInner {
                channel_name: channel_name.into(),
                role,
                local_id,
                config,
                opener,
                log: RwLock::new(None),
                address: Mutex::new(address),
                init_lock: tokio::sync::Mutex::new(()),
                peers: Mutex::new(HashMap::new()),
                next_generation: Mutex::new(0),
                status_tx,
                status_task: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.inner.channel_name
    }

    pub fn role(&self) -> LogRole {
        self.inner.role
    }

    pub fn status(&self) -> SyncStatus {
        *self.inner.status_tx.borrow()
    }

    /// Watch status changes
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn address(&self) -> LogAddressState {
        *self.inner.address.lock()
    }

    /// The open log instance, if initialized.
    pub fn log(&self) -> Option<Arc<dyn ReplicatedLog>> {
        self.inner.log.read().clone()
    }

    /// Peers with a running pipeline
    pub fn registered_peers(&self) -> Vec<PeerId> {
        self.inner.peers.lock().keys().cloned().collect()
    }

    /// Open the log. The origin creates it; a replica opens `address`, or
    /// the address it already knows. A second call is a no-op.
    pub async fn initialize(&self, address: Option<LogAddress>) -> ChatResult<Arc<dyn ReplicatedLog>> {
        self.inner.initialize(address).await
    }

    /// Start (or restart) synchronization with `remote` over `connection`.
    pub fn register_peer(&self, connection: PeerConnection, remote: PeerId) -> ChatResult<()> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(ChatError::InvalidState(format!(
                "sync engine {} destroyed",
                inner.channel_name
            )));
        }

        let channel_idx = channel_index(
            &inner.channel_name,
            &inner.local_id,
            &remote,
            inner.role == LogRole::Origin,
        );
        let generation = {
            let mut next = inner.next_generation.lock();
            *next += 1;
            *next
        };
        let cancel = inner.shutdown.child_token();
        let task = tokio::spawn(inner.clone().run_peer(
            connection,
            remote.clone(),
            channel_idx,
            generation,
            cancel.clone(),
        ));

        let previous = inner.peers.lock().insert(
            remote.clone(),
            PeerPipeline {
                generation,
                cancel,
                task,
            },
        );
        if let Some(previous) = previous {
            debug!(channel = %inner.channel_name, peer = %remote, "Replacing peer pipeline");
            previous.cancel.cancel();
        }
        info!(channel = %inner.channel_name, peer = %remote, channel_idx, "Registered peer");
        Ok(())
    }

    /// Tear down every peer pipeline. The log stays open.
    pub fn stop_all_peers(&self) {
        let pipelines: Vec<(PeerId, PeerPipeline)> = self.inner.peers.lock().drain().collect();
        for (peer, pipeline) in pipelines {
            debug!(channel = %self.inner.channel_name, %peer, "Stopping peer pipeline");
            pipeline.cancel.cancel();
        }
    }

    /// Stop all pipelines and status tracking. Safe to call repeatedly.
    pub fn destroy(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.stop_all_peers();
        if let Some(task) = self.inner.status_task.lock().take() {
            task.abort();
        }
        info!(channel = %self.inner.channel_name, "Sync engine destroyed");
    }

    /// Whether a pipeline for `remote` is registered and still running.
    pub fn is_peer_active(&self, remote: &PeerId) -> bool {
        self.inner
            .peers
            .lock()
            .get(remote)
            .is_some_and(|p| !p.task.is_finished())
    }
}

impl EngineInner {
    fn set_status(&self, status: SyncStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    async fn initialize(self: &Arc<Self>, address: Option<LogAddress>) -> ChatResult<Arc<dyn ReplicatedLog>> {
        let _guard = self.init_lock.lock().await;
        let existing = self.log.read().clone();
        if let Some(log) = existing {
            return Ok(log);
        }
        if self.shutdown.is_cancelled() {
            return Err(ChatError::InvalidState(format!("sync engine {} destroyed", self.channel_name)));
        }

        let address = match self.role {
            LogRole::Origin => None,
            LogRole::Replica => {
                let known = self.address.lock().resolved();
                Some(address.or(known).ok_or_else(|| {
                    ChatError::InvalidState(format!("address of {} not known yet", self.channel_name))
                })?)
            }
        };

        self.set_status(SyncStatus::Initializing);
        let opened = async {
            let log = self.opener.open(&self.channel_name, address).await?;
            log.ready().await?;
            Ok::<_, ChatError>(log)
        };
        let log = match opened.await {
            Ok(log) => log,
            Err(e) => {
                self.set_status(SyncStatus::NotInitialized);
                return Err(e);
            }
        };

        *self.address.lock() = LogAddressState::Resolved(log.address());
        *self.log.write() = Some(log.clone());
        self.track_status(&log);
        info!(channel = %self.channel_name, address = %log.address(), role = ?self.role, "Log initialized");
        Ok(log)
    }

    /// Keep the published status in line with the log's peer set.
    fn track_status(self: &Arc<Self>, log: &Arc<dyn ReplicatedLog>) {
        let mut events = log.subscribe();
        self.set_status(SyncStatus::from_peers(&log.peers()));

        let weak: Weak<Self> = Arc::downgrade(self);
        let log = log.clone();
        let task = tokio::spawn(async move {
            loop {
                let refresh = match events.recv().await {
                    Ok(LogEvent::PeerAdd(_) | LogEvent::PeerOpen(_) | LogEvent::PeerRemove(_) | LogEvent::Ready) => true,
                    Ok(_) => false,
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !refresh {
                    continue;
                }
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                engine.set_status(SyncStatus::from_peers(&log.peers()));
            }
        });
        if let Some(previous) = self.status_task.lock().replace(task) {
            previous.abort();
        }
    }

    async fn run_peer(
        self: Arc<Self>,
        connection: PeerConnection,
        remote: PeerId,
        channel_idx: u32,
        generation: u64,
        cancel: CancellationToken,
    ) {
        if let Err(e) = self.sync_with_peer(&connection, &remote, channel_idx, &cancel).await {
            match e {
                ChatError::Closed(_) => debug!(channel = %self.channel_name, peer = %remote, error = %e, "Peer pipeline closed"),
                _ => warn!(channel = %self.channel_name, peer = %remote, error = %e, "Peer pipeline failed"),
            }
        }

        let mut peers = self.peers.lock();
        if peers.get(&remote).is_some_and(|p| p.generation == generation) {
            peers.remove(&remote);
        }
    }

    async fn sync_with_peer(
        self: &Arc<Self>,
        connection: &PeerConnection,
        remote: &PeerId,
        channel_idx: u32,
        cancel: &CancellationToken,
    ) -> ChatResult<()> {
        let existing = self.log.read().clone();
        let log = match (existing, self.role) {
            (Some(log), _) => log,
            (None, LogRole::Origin) => self.initialize(None).await?,
            (None, LogRole::Replica) => {
                let known = self.address.lock().resolved();
                let address = match known {
                    Some(address) => address,
                    None => {
                        self.set_status(SyncStatus::Initializing);
                        debug!(channel = %self.channel_name, peer = %remote, channel_idx, "Waiting for log address");
                        let learned = receive_address(connection, channel_idx, cancel).await;
                        if learned.is_err() && self.log.read().is_none() {
                            self.set_status(SyncStatus::NotInitialized);
                        }
                        learned?
                    }
                };
                self.initialize(Some(address)).await?
            }
        };

        let lighthouse_stop = cancel.child_token();
        if self.role == LogRole::Origin {
            tokio::spawn(run_lighthouse(
                connection.clone(),
                channel_idx,
                log.address(),
                self.config.lighthouse_period(),
                lighthouse_stop.clone(),
            ));
        }

        let max_retries = self.config.retry.max_retries;
        let mut attempt = 0;
        let result = loop {
            let result = self
                .replicate_over(&log, connection, channel_idx, cancel, &lighthouse_stop)
                .await;
            match result {
                Err(e) if e.is_timeout() && connection.is_open() && !cancel.is_cancelled() && attempt < max_retries => {
                    attempt += 1;
                    warn!(channel = %self.channel_name, peer = %remote, attempt, error = %e, "Replication timed out, retrying");
                }
                other => break other,
            }
        };
        lighthouse_stop.cancel();
        result
    }

    /// Run one replication session over the user channel until it ends.
    async fn replicate_over(
        &self,
        log: &Arc<dyn ReplicatedLog>,
        connection: &PeerConnection,
        channel_idx: u32,
        cancel: &CancellationToken,
        lighthouse_stop: &CancellationToken,
    ) -> ChatResult<()> {
        let tag = ChannelTag::new(ChannelKind::UserChannel, channel_idx);
        let mut events = log.subscribe();
        let ReplicationStream {
            session,
            outbound,
            inbound,
            mut outcome,
        } = log.replicate(self.role == LogRole::Origin)?;

        let wrap = spawn_wrap(tag, outbound, connection.sender());
        let unwrap = spawn_unwrap(tag, connection.subscribe(), inbound);
        debug!(channel = %self.channel_name, session, channel_idx, "Replication started");

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    outcome.abort();
                    break Ok(());
                }
                joined = &mut outcome => {
                    break joined.unwrap_or_else(|e| Err(ChatError::Log(format!("replication task failed: {e}"))));
                }
                event = events.recv() => {
                    let check = match event {
                        Ok(LogEvent::PeerOpen(opened)) => opened == session,
                        Err(broadcast::error::RecvError::Lagged(_)) => true,
                        _ => false,
                    };
                    if check && log.peers().iter().any(|p| p.session == session && p.remote_opened) {
                        lighthouse_stop.cancel();
                    }
                }
            }
        };

        wrap.abort();
        unwrap.abort();
        debug!(channel = %self.channel_name, session, ok = result.is_ok(), "Replication ended");
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::log::MemoryLogOpener;
    use crate::transport::PeerLink;

    fn config(period_ms: u64) -> SyncConfig {
        SyncConfig {
            lighthouse_period_ms: period_ms,
            ..SyncConfig::default()
        }
    }

    fn connections(origin: &PeerId, replica: &PeerId) -> (PeerConnection, PeerConnection) {
        let (a, b) = PeerLink::pair(64);
        (
            PeerConnection::open(a, replica.clone(), origin.clone()),
            PeerConnection::open(b, origin.clone(), origin.clone()),
        )
    }

    async fn wait_status(engine: &SyncEngine, status: SyncStatus) {
        let mut rx = engine.watch_status();
        tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| *s == status))
            .await
            .expect("status not reached")
            .unwrap();
    }

    #[tokio::test]
    async fn test_origin_initialize_is_idempotent() {
        let engine = SyncEngine::new(
            "creator-log",
            LogRole::Origin,
            PeerId::from("me"),
            LogAddressState::Unresolved,
            Arc::new(MemoryLogOpener::new()),
            SyncConfig::default(),
        );
        assert_eq!(engine.status(), SyncStatus::NotInitialized);
        let first = engine.initialize(None).await.unwrap();
        let second = engine.initialize(None).await.unwrap();
        assert_eq!(first.address(), second.address());
        assert_eq!(engine.address(), LogAddressState::Resolved(first.address()));
        assert_eq!(engine.status(), SyncStatus::Connecting);
    }

    #[tokio::test]
    async fn test_replica_without_address_cannot_initialize() {
        let engine = SyncEngine::new(
            "creator-log",
            LogRole::Replica,
            PeerId::from("me"),
            LogAddressState::Unresolved,
            Arc::new(MemoryLogOpener::new()),
            SyncConfig::default(),
        );
        assert!(matches!(engine.initialize(None).await, Err(ChatError::InvalidState(_))));
        assert_eq!(engine.status(), SyncStatus::NotInitialized);
    }

    #[tokio::test]
    async fn test_replica_bootstraps_and_goes_online() {
        let origin_id = PeerId::from("origin-peer");
        let replica_id = PeerId::from("replica-peer");
        let (origin_conn, replica_conn) = connections(&origin_id, &replica_id);

        let origin = SyncEngine::new(
            "creator-log",
            LogRole::Origin,
            origin_id.clone(),
            LogAddressState::Unresolved,
            Arc::new(MemoryLogOpener::new()),
            config(20),
        );
        let replica = SyncEngine::new(
            "creator-log",
            LogRole::Replica,
            replica_id.clone(),
            LogAddressState::Unresolved,
            Arc::new(MemoryLogOpener::new()),
            config(20),
        );

        let log = origin.initialize(None).await.unwrap();
        log.append(b"hello".to_vec()).await.unwrap();

        replica.register_peer(replica_conn, origin_id.clone()).unwrap();
        origin.register_peer(origin_conn, replica_id.clone()).unwrap();

        wait_status(&replica, SyncStatus::Online).await;
        wait_status(&origin, SyncStatus::Online).await;
        assert_eq!(replica.address().resolved(), Some(log.address()));

        let replica_log = replica.log().unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while replica_log.len() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(replica_log.get_batch(0, 1).await.unwrap(), vec![b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn test_stop_all_peers_keeps_log() {
        let origin_id = PeerId::from("o");
        let replica_id = PeerId::from("r");
        let (origin_conn, replica_conn) = connections(&origin_id, &replica_id);
        let origin = SyncEngine::new(
            "creator-log",
            LogRole::Origin,
            origin_id,
            LogAddressState::Unresolved,
            Arc::new(MemoryLogOpener::new()),
            config(20),
        );
        origin.register_peer(origin_conn, replica_id.clone()).unwrap();
        wait_status(&origin, SyncStatus::Connecting).await;

        assert!(origin.is_peer_active(&replica_id));
        origin.stop_all_peers();
        assert!(origin.registered_peers().is_empty());
        assert!(!origin.is_peer_active(&replica_id));
        assert!(origin.log().is_some());

        origin.destroy();
        origin.destroy();
        assert!(origin.register_peer(replica_conn, replica_id).is_err());
    }
}
