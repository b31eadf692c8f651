//! Discovery tests over the in-memory rendezvous server and connector
//!
//! Two managers sharing a secret find each other through a `MemoryTracker`
//! and end up with one live connection each way.

use std::sync::Arc;

use pairchat_core::{
    AnnounceTopic, DiscoveryConfig, DiscoveryEvent, DiscoveryManager, MemoryConnector,
    MemoryTracker, PeerId, ShareSecret,
};
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};

const TRACKER: &str = "memory://tracker";

fn manager(tracker: &MemoryTracker, connector: &MemoryConnector, urls: &[&str]) -> DiscoveryManager {
    let mut config = DiscoveryConfig::with_trackers(urls.iter().copied());
    config.offer_pool_size = 3;
    DiscoveryManager::new(
        config,
        PeerId::random(),
        Arc::new(tracker.clone()),
        Arc::new(connector.clone()),
    )
}

async fn next_connected(events: &mut broadcast::Receiver<DiscoveryEvent>) -> (PeerId, AnnounceTopic) {
    loop {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(DiscoveryEvent::PeerConnected { peer_id, topic, .. })) => return (peer_id, topic),
            Ok(Ok(_)) => continue,
            other => panic!("no peer connected: {:?}", other.map(|r| r.map(|_| ()))),
        }
    }
}

#[tokio::test]
async fn test_same_secret_same_topic() {
    let tracker = MemoryTracker::new();
    let connector = MemoryConnector::new();
    let a = manager(&tracker, &connector, &[TRACKER]);
    let b = manager(&tracker, &connector, &[TRACKER]);
    a.connect_to_trackers().await;
    b.connect_to_trackers().await;

    let secret = ShareSecret::new(b"correct horse".to_vec());
    let topic_a = a.create_announce(&secret).await.unwrap();
    let topic_b = b.create_announce(&secret).await.unwrap();
    assert_eq!(topic_a, topic_b);
    assert_eq!(topic_a.as_str().len(), 20);

    let other = a
        .create_announce(&ShareSecret::new(b"battery staple".to_vec()))
        .await
        .unwrap();
    assert_ne!(topic_a, other);
}

#[tokio::test]
async fn test_two_managers_connect() {
    let tracker = MemoryTracker::new();
    let connector = MemoryConnector::new();
    let a = manager(&tracker, &connector, &[TRACKER]);
    let b = manager(&tracker, &connector, &[TRACKER]);
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();
    a.connect_to_trackers().await;
    b.connect_to_trackers().await;

    let secret = ShareSecret::new(b"shared".to_vec());
    let topic = a.create_announce(&secret).await.unwrap();
    b.create_announce(&secret).await.unwrap();

    let (seen_by_a, topic_a) = next_connected(&mut a_events).await;
    let (seen_by_b, topic_b) = next_connected(&mut b_events).await;
    assert_eq!(&seen_by_a, b.self_id());
    assert_eq!(&seen_by_b, a.self_id());
    assert_eq!(topic_a, topic);
    assert_eq!(topic_b, topic);

    assert!(a.peer_connection(b.self_id()).is_some_and(|c| c.is_open()));
    assert!(b.peer_connection(a.self_id()).is_some_and(|c| c.is_open()));
}

#[tokio::test]
async fn test_repeated_announce_keeps_one_timer() {
    let tracker = MemoryTracker::new();
    let connector = MemoryConnector::new();
    let a = manager(&tracker, &connector, &[TRACKER]);
    a.connect_to_trackers().await;

    let secret = ShareSecret::new(b"seed".to_vec());
    let first = a.create_announce(&secret).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let announces = tracker.announce_count();
    assert_eq!(announces, 1);

    let second = a.create_announce(&secret).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(first, second);
    assert!(a.is_announcing(&first));
    assert_eq!(a.offer_pool_len(&first), 3);
    assert_eq!(tracker.announce_count(), announces);
}

#[tokio::test]
async fn test_duplicate_answer_creates_one_connection() {
    let tracker = MemoryTracker::new().with_duplicate_answers();
    let connector = MemoryConnector::new();
    let a = manager(&tracker, &connector, &[TRACKER]);
    let b = manager(&tracker, &connector, &[TRACKER]);
    let mut b_events = b.subscribe();
    a.connect_to_trackers().await;
    b.connect_to_trackers().await;

    let secret = ShareSecret::new(b"once".to_vec());
    a.create_announce(&secret).await.unwrap();
    b.create_announce(&secret).await.unwrap();

    let (peer, _) = next_connected(&mut b_events).await;
    assert_eq!(&peer, a.self_id());

    let extra = timeout(Duration::from_millis(300), async {
        loop {
            if let Ok(DiscoveryEvent::PeerConnected { .. }) = b_events.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(extra.is_err(), "second answer produced another connection");
    assert_eq!(b.connected_peers(), vec![a.self_id().clone()]);
}

#[tokio::test]
async fn test_unreachable_tracker_does_not_block_others() {
    let tracker = MemoryTracker::new();
    tracker.set_unreachable("memory://down");
    let connector = MemoryConnector::new();
    let a = manager(&tracker, &connector, &["memory://down", TRACKER]);

    assert_eq!(a.connect_to_trackers().await, 1);
    assert_eq!(a.tracker_count(), 1);

    let topic = a.create_announce(&ShareSecret::new(b"s".to_vec())).await.unwrap();
    assert!(a.is_announcing(&topic));
}

#[tokio::test]
async fn test_destroy_releases_offers() {
    let tracker = MemoryTracker::new();
    let connector = MemoryConnector::new();
    let a = manager(&tracker, &connector, &[TRACKER]);
    a.connect_to_trackers().await;
    a.create_announce(&ShareSecret::new(b"s".to_vec())).await.unwrap();
    assert_eq!(connector.pending_count(), 3);

    a.destroy();
    timeout(Duration::from_secs(2), async {
        while connector.pending_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("offers not withdrawn");
}
