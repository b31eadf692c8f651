//! Log synchronization between an origin and a replica engine

use std::sync::Arc;
use std::time::{Duration, Instant};

use pairchat_core::transport::PeerLink;
use pairchat_core::{
    LogAddressState, LogEvent, LogRole, MemoryLogOpener, PeerConnection, PeerId, ReplicatedLog,
    RetryPolicy, SyncConfig, SyncEngine, SyncStatus,
};

const PERIOD_MS: u64 = 500;

fn engine(role: LogRole, local: &PeerId, opener: MemoryLogOpener) -> SyncEngine {
    let config = SyncConfig {
        lighthouse_period_ms: PERIOD_MS,
        ..SyncConfig::default()
    };
    SyncEngine::new(
        "topic/creator",
        role,
        local.clone(),
        LogAddressState::Unresolved,
        Arc::new(opener),
        config,
    )
}

fn connections(origin: &PeerId, replica: &PeerId) -> (PeerConnection, PeerConnection) {
    let (a, b) = PeerLink::pair(64);
    (
        PeerConnection::open(a, replica.clone(), origin.clone()),
        PeerConnection::open(b, origin.clone(), origin.clone()),
    )
}

async fn wait_for(engine: &SyncEngine, within: Duration, pred: impl Fn(SyncStatus) -> bool) {
    let mut rx = engine.watch_status();
    tokio::time::timeout(within, rx.wait_for(|s| pred(*s)))
        .await
        .expect("status not reached in time")
        .unwrap();
}

#[tokio::test]
async fn test_replica_learns_address_within_one_lighthouse_period() {
    let origin_id = PeerId::from("origin");
    let replica_id = PeerId::from("replica");
    let (origin_conn, replica_conn) = connections(&origin_id, &replica_id);

    let origin = engine(LogRole::Origin, &origin_id, MemoryLogOpener::new());
    let replica = engine(LogRole::Replica, &replica_id, MemoryLogOpener::new());
    let log = origin.initialize(None).await.unwrap();

    replica.register_peer(replica_conn, origin_id.clone()).unwrap();
    wait_for(&replica, Duration::from_secs(1), |s| s == SyncStatus::Initializing).await;
    assert_eq!(replica.address(), LogAddressState::Unresolved);

    let started = Instant::now();
    origin.register_peer(origin_conn, replica_id.clone()).unwrap();
    wait_for(&replica, Duration::from_millis(PERIOD_MS), |s| {
        matches!(s, SyncStatus::Connecting | SyncStatus::Online)
    })
    .await;
    assert!(started.elapsed() < Duration::from_millis(PERIOD_MS));
    assert_eq!(replica.address(), LogAddressState::Resolved(log.address()));

    wait_for(&replica, Duration::from_secs(3), |s| s == SyncStatus::Online).await;
    wait_for(&origin, Duration::from_secs(3), |s| s == SyncStatus::Online).await;
}

#[tokio::test]
async fn test_entries_flow_from_origin_to_replica() {
    let origin_id = PeerId::from("origin");
    let replica_id = PeerId::from("replica");
    let (origin_conn, replica_conn) = connections(&origin_id, &replica_id);

    let origin = engine(LogRole::Origin, &origin_id, MemoryLogOpener::new());
    let replica = engine(LogRole::Replica, &replica_id, MemoryLogOpener::new());
    let log = origin.initialize(None).await.unwrap();
    log.append(b"before".to_vec()).await.unwrap();

    replica.register_peer(replica_conn, origin_id).unwrap();
    origin.register_peer(origin_conn, replica_id).unwrap();
    wait_for(&replica, Duration::from_secs(3), |s| s == SyncStatus::Online).await;

    log.append(b"after".to_vec()).await.unwrap();
    let copy = replica.log().unwrap();
    tokio::time::timeout(Duration::from_secs(3), async {
        while copy.len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("entries not replicated");
    assert_eq!(
        copy.get_batch(0, 2).await.unwrap(),
        vec![b"before".to_vec(), b"after".to_vec()]
    );
    assert!(copy.append(b"nope".to_vec()).await.is_err());
}

#[tokio::test]
async fn test_closed_connection_leaves_replica_uninitialized() {
    let origin_id = PeerId::from("origin");
    let replica_id = PeerId::from("replica");
    let (origin_conn, replica_conn) = connections(&origin_id, &replica_id);

    let replica = engine(LogRole::Replica, &replica_id, MemoryLogOpener::new());
    replica.register_peer(replica_conn, origin_id.clone()).unwrap();
    wait_for(&replica, Duration::from_secs(1), |s| s == SyncStatus::Initializing).await;

    origin_conn.close();
    wait_for(&replica, Duration::from_secs(1), |s| s == SyncStatus::NotInitialized).await;
    assert!(replica.log().is_none());
}

/// Register a peer that never answers and count the replication sessions
/// the origin starts before giving up.
async fn sessions_before_giving_up(max_retries: u32) -> usize {
    let origin_id = PeerId::from("origin");
    let replica_id = PeerId::from("replica");
    let (origin_conn, _silent_replica) = connections(&origin_id, &replica_id);

    let origin = SyncEngine::new(
        "topic/creator",
        LogRole::Origin,
        origin_id,
        LogAddressState::Unresolved,
        Arc::new(MemoryLogOpener::with_handshake_timeout(Duration::from_millis(50))),
        SyncConfig {
            retry: RetryPolicy { max_retries },
            ..SyncConfig::default()
        },
    );
    let log = origin.initialize(None).await.unwrap();
    let mut events = log.subscribe();
    origin.register_peer(origin_conn, replica_id.clone()).unwrap();
    assert!(origin.is_peer_active(&replica_id));

    tokio::time::timeout(Duration::from_secs(2), async {
        while origin.is_peer_active(&replica_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pipeline should end after the bounded retry");
    assert!(origin.log().is_some());

    let mut sessions = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, LogEvent::PeerAdd(_)) {
            sessions += 1;
        }
    }
    sessions
}

#[tokio::test]
async fn test_handshake_timeout_is_retried_once() {
    assert_eq!(sessions_before_giving_up(1).await, 2);
}

#[tokio::test]
async fn test_handshake_timeout_without_retries_gives_up() {
    assert_eq!(sessions_before_giving_up(0).await, 1);
}
