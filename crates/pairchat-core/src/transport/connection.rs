//! Live peer connection with inbound fan-out

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::PeerLink;
use crate::error::{ChatError, ChatResult};
use crate::mux::FrameBus;
use crate::types::PeerId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// An established transport to one remote peer.
///
/// Cheap to clone. Closing any clone closes the connection for all of them
/// and for the remote end.
#[derive(Clone)]
pub struct PeerConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: u64,
    remote: PeerId,
    offer_owner: PeerId,
    outbound: mpsc::Sender<Bytes>,
    bus: FrameBus,
    closed: CancellationToken,
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.inner.id)
            .field("remote", &self.inner.remote)
            .field("open", &self.is_open())
            .finish()
    }
}

impl PeerConnection {
    /// Wrap a link and start pumping its inbound frames into the bus.
    ///
    /// `offer_owner` is the peer whose offer produced this link; it decides
    /// which of two crossing connections survives.
    pub fn open(link: PeerLink, remote: PeerId, offer_owner: PeerId) -> Self {
        let PeerLink { tx, mut rx, closed } = link;
        let bus = FrameBus::new();
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);

        let reader_bus = bus.clone();
        let reader_closed = closed.clone();
        let reader_remote = remote.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_closed.cancelled() => break,
                    frame = rx.recv() => match frame {
                        Some(frame) => {
                            trace!(remote = %reader_remote, len = frame.len(), "Inbound frame");
                            reader_bus.publish(frame).await;
                        }
                        None => break,
                    },
                }
            }
            reader_closed.cancel();
            reader_bus.close();
            debug!(remote = %reader_remote, connection = id, "Connection reader stopped");
        });

        Self {
            inner: Arc::new(ConnectionInner {
                id,
                remote,
                offer_owner,
                outbound: tx,
                bus,
                closed,
            }),
        }
    }

    /// Process-unique id of this connection.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn remote_peer(&self) -> &PeerId {
        &self.inner.remote
    }

    pub fn offer_owner(&self) -> &PeerId {
        &self.inner.offer_owner
    }

    /// Outbound frame sender, for wrap stages.
    pub fn sender(&self) -> mpsc::Sender<Bytes> {
        self.inner.outbound.clone()
    }

    /// Subscribe to all inbound frames from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<Bytes> {
        self.inner.bus.subscribe()
    }

    pub async fn send(&self, frame: Bytes) -> ChatResult<()> {
        if !self.is_open() {
            return Err(ChatError::Closed(format!("connection to {}", self.inner.remote)));
        }
        self.inner
            .outbound
            .send(frame)
            .await
            .map_err(|_| ChatError::Transport(format!("connection to {} dropped", self.inner.remote)))
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.is_cancelled()
    }

    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    /// Resolve once the connection is closed from either side.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_pair() -> (PeerConnection, PeerConnection) {
        let (a, b) = PeerLink::pair(8);
        let alice = PeerId::from("alice");
        let bob = PeerId::from("bob");
        (
            PeerConnection::open(a, bob.clone(), alice.clone()),
            PeerConnection::open(b, alice.clone(), alice),
        )
    }

    #[tokio::test]
    async fn test_frames_reach_every_subscriber() {
        let (a, b) = connected_pair();
        let mut first = b.subscribe();
        let mut second = b.subscribe();

        a.send(Bytes::from_static(b"one")).await.unwrap();
        assert_eq!(first.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(second.recv().await.unwrap(), Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn test_close_propagates_to_remote() {
        let (a, b) = connected_pair();
        let mut sub = b.subscribe();
        a.close();
        b.closed().await;
        assert!(!b.is_open());
        assert!(sub.recv().await.is_none());
        assert!(matches!(a.send(Bytes::new()).await, Err(ChatError::Closed(_))));
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (a, b) = connected_pair();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.offer_owner(), b.offer_owner());
    }
}
