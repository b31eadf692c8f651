//! Offer/answer negotiation handles

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::SignalData;
use crate::error::{ChatError, ChatResult};

/// Raw duplex byte link between two peers.
///
/// Both ends of a pair share one cancellation token: closing either end
/// closes the link.
pub struct PeerLink {
    pub tx: mpsc::Sender<Bytes>,
    pub rx: mpsc::Receiver<Bytes>,
    pub closed: CancellationToken,
}

impl PeerLink {
    /// Create two connected ends.
    pub fn pair(capacity: usize) -> (PeerLink, PeerLink) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        let closed = CancellationToken::new();
        (
            PeerLink {
                tx: a_tx,
                rx: a_rx,
                closed: closed.clone(),
            },
            PeerLink {
                tx: b_tx,
                rx: b_rx,
                closed,
            },
        )
    }
}

/// Caller side of a negotiation.
pub struct Negotiation {
    handle: NegotiationHandle,
    connected: Option<oneshot::Receiver<PeerLink>>,
}

impl Negotiation {
    /// Create a negotiation and the driver half handed to the connector.
    pub fn channel(initiator: bool) -> (Negotiation, NegotiationDriver) {
        let (local_tx, local_rx) = watch::channel(None);
        let (remote_tx, remote_rx) = mpsc::channel(4);
        let (connected_tx, connected_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let negotiation = Negotiation {
            handle: NegotiationHandle {
                local_signal: local_rx,
                remote_tx,
                cancel: cancel.clone(),
            },
            connected: Some(connected_rx),
        };
        let driver = NegotiationDriver {
            initiator,
            local_signal: local_tx,
            remote_rx,
            connected: connected_tx,
            cancel,
        };
        (negotiation, driver)
    }

    pub fn handle(&self) -> NegotiationHandle {
        self.handle.clone()
    }

    /// Take the completion receiver. Returns `None` after the first call.
    pub fn take_connected(&mut self) -> Option<oneshot::Receiver<PeerLink>> {
        self.connected.take()
    }

    pub fn destroy(&self) {
        self.handle.destroy();
    }
}

/// Cloneable control handle for a negotiation.
#[derive(Clone)]
pub struct NegotiationHandle {
    local_signal: watch::Receiver<Option<SignalData>>,
    remote_tx: mpsc::Sender<SignalData>,
    cancel: CancellationToken,
}

impl NegotiationHandle {
    /// Wait for the local session description.
    pub async fn local_signal(&self) -> ChatResult<SignalData> {
        let mut rx = self.local_signal.clone();
        let wait = async move { rx.wait_for(Option::is_some).await.map(|s| (*s).clone()) };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(ChatError::Closed("negotiation destroyed".to_string())),
            result = wait => match result {
                Ok(Some(signal)) => Ok(signal),
                _ => Err(ChatError::Signaling("negotiation ended without a description".to_string())),
            },
        }
    }

    /// Feed the remote session description.
    pub async fn signal(&self, remote: SignalData) -> ChatResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ChatError::Closed("negotiation destroyed".to_string()));
        }
        self.remote_tx
            .send(remote)
            .await
            .map_err(|_| ChatError::Signaling("negotiation no longer accepts signals".to_string()))
    }

    pub fn destroy(&self) {
        self.cancel.cancel();
    }

    pub fn is_destroyed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Connector side of a negotiation.
pub struct NegotiationDriver {
    pub initiator: bool,
    pub local_signal: watch::Sender<Option<SignalData>>,
    pub remote_rx: mpsc::Receiver<SignalData>,
    pub connected: oneshot::Sender<PeerLink>,
    pub cancel: CancellationToken,
}
