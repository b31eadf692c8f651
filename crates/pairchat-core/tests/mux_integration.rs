//! Channel multiplexing over a live peer connection

use bytes::Bytes;
use pairchat_core::mux::{spawn_unwrap, spawn_wrap, STAGE_CAPACITY};
use pairchat_core::transport::PeerLink;
use pairchat_core::{channel_index, ChannelKind, ChannelTag, PeerConnection, PeerId};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

fn connected_pair() -> (PeerConnection, PeerConnection) {
    let alice = PeerId::from("alice");
    let bob = PeerId::from("bob");
    let (a, b) = PeerLink::pair(STAGE_CAPACITY);
    (
        PeerConnection::open(a, bob, alice.clone()),
        PeerConnection::open(b, alice.clone(), alice),
    )
}

#[tokio::test]
async fn test_payload_reaches_matching_channel_only() {
    let (sender, receiver) = connected_pair();
    let payload = Bytes::from_static(b"fifteen bytes!!");
    assert_eq!(payload.len(), 15);

    let (match_tx, mut matching) = mpsc::channel(STAGE_CAPACITY);
    let (other_tx, mut other) = mpsc::channel(STAGE_CAPACITY);
    spawn_unwrap(ChannelTag::new(ChannelKind::UserChannel, 42), receiver.subscribe(), match_tx);
    spawn_unwrap(ChannelTag::new(ChannelKind::UserChannel, 43), receiver.subscribe(), other_tx);

    let (chunk_tx, chunk_rx) = mpsc::channel(STAGE_CAPACITY);
    spawn_wrap(ChannelTag::new(ChannelKind::UserChannel, 42), chunk_rx, sender.sender());
    chunk_tx.send(payload.clone()).await.unwrap();

    let received = timeout(Duration::from_secs(2), matching.recv()).await.unwrap();
    assert_eq!(received, Some(payload));
    assert!(timeout(Duration::from_millis(100), other.recv()).await.is_err());
}

#[tokio::test]
async fn test_channel_order_is_preserved() {
    let (sender, receiver) = connected_pair();
    let tag = ChannelTag::new(ChannelKind::UserChannel, 7);

    let (out_tx, mut out) = mpsc::channel(STAGE_CAPACITY);
    spawn_unwrap(tag, receiver.subscribe(), out_tx);
    let (chunk_tx, chunk_rx) = mpsc::channel(STAGE_CAPACITY);
    spawn_wrap(tag, chunk_rx, sender.sender());

    for i in 0u8..20 {
        chunk_tx.send(Bytes::from(vec![i])).await.unwrap();
    }
    for i in 0u8..20 {
        let chunk = timeout(Duration::from_secs(2), out.recv()).await.unwrap().unwrap();
        assert_eq!(chunk.as_ref(), &[i]);
    }
}

#[tokio::test]
async fn test_close_ends_unwrapped_stream() {
    let (sender, receiver) = connected_pair();
    let (out_tx, mut out) = mpsc::channel(STAGE_CAPACITY);
    spawn_unwrap(ChannelTag::new(ChannelKind::ControlKeyExchange, 1), receiver.subscribe(), out_tx);

    sender.close();
    let end = timeout(Duration::from_secs(2), out.recv()).await.unwrap();
    assert_eq!(end, None);
}

#[test]
fn test_both_ends_agree_on_channel_index() {
    let creator = PeerId::random();
    let joiner = PeerId::random();

    let creator_log_at_creator = channel_index("topic/creator", &creator, &joiner, true);
    let creator_log_at_joiner = channel_index("topic/creator", &joiner, &creator, false);
    assert_eq!(creator_log_at_creator, creator_log_at_joiner);

    let joiner_log_at_creator = channel_index("topic/joiner", &creator, &joiner, false);
    assert_ne!(creator_log_at_creator, joiner_log_at_creator);
}
