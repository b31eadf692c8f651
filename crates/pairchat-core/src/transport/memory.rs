//! In-process peer connector
//!
//! Negotiations meet on a shared hub. The offer description carries a hub
//! token; the responder claims the token and the initiator completes both
//! ends when the matching answer arrives.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::{Negotiation, NegotiationDriver, PeerConnector, PeerLink, SignalData, SignalKind};
use crate::mux::STAGE_CAPACITY;
use crate::types::gen_id;

const OFFER_PREFIX: &str = "memory-offer:";
const ANSWER_PREFIX: &str = "memory-answer:";

#[derive(Default)]
struct Slot {
    responder: Option<oneshot::Sender<PeerLink>>,
}

/// [`PeerConnector`] whose links are in-memory channel pairs.
///
/// Clones share the hub, so every party in a test or demo must be built from
/// clones of the same connector.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    hub: Arc<Mutex<HashMap<String, Slot>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers that are waiting for an answer.
    pub fn pending_count(&self) -> usize {
        self.hub.lock().len()
    }
}

impl PeerConnector for MemoryConnector {
    fn create(&self, initiator: bool) -> Negotiation {
        let (negotiation, driver) = Negotiation::channel(initiator);
        let hub = self.hub.clone();
        if initiator {
            tokio::spawn(drive_initiator(hub, driver));
        } else {
            tokio::spawn(drive_responder(hub, driver));
        }
        negotiation
    }
}

async fn drive_initiator(hub: Arc<Mutex<HashMap<String, Slot>>>, driver: NegotiationDriver) {
    let NegotiationDriver {
        local_signal,
        mut remote_rx,
        connected,
        cancel,
        ..
    } = driver;

    let token = gen_id(16);
    hub.lock().insert(token.clone(), Slot::default());
    local_signal.send_replace(Some(SignalData::offer(format!("{OFFER_PREFIX}{token}"))));

    let expected = format!("{ANSWER_PREFIX}{token}");
    loop {
        let remote = tokio::select! {
            _ = cancel.cancelled() => break,
            remote = remote_rx.recv() => remote,
        };
        let Some(remote) = remote else { break };
        if remote.kind != SignalKind::Answer || remote.sdp != expected {
            trace!(sdp = %remote.sdp, "Ignoring foreign signal");
            continue;
        }

        let slot = hub.lock().remove(&token);
        let Some(responder) = slot.and_then(|s| s.responder) else {
            debug!(%token, "Answer without a claimed slot");
            break;
        };

        let (ours, theirs) = PeerLink::pair(STAGE_CAPACITY);
        if responder.send(theirs).is_ok() {
            let _ = connected.send(ours);
        }
        return;
    }

    hub.lock().remove(&token);
}

async fn drive_responder(hub: Arc<Mutex<HashMap<String, Slot>>>, driver: NegotiationDriver) {
    let NegotiationDriver {
        local_signal,
        mut remote_rx,
        connected,
        cancel,
        ..
    } = driver;

    let remote = tokio::select! {
        _ = cancel.cancelled() => return,
        remote = remote_rx.recv() => remote,
    };
    let Some(remote) = remote else { return };
    let Some(token) = remote.sdp.strip_prefix(OFFER_PREFIX) else {
        debug!(sdp = %remote.sdp, "Not a memory offer");
        return;
    };

    {
        let mut hub = hub.lock();
        match hub.get_mut(token) {
            Some(slot) if slot.responder.is_none() => slot.responder = Some(connected),
            _ => {
                debug!(%token, "Offer already claimed or withdrawn");
                return;
            }
        }
    }

    local_signal.send_replace(Some(SignalData::answer(format!("{ANSWER_PREFIX}{token}"))));

    // The answer stays readable until the caller drops or destroys the negotiation
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = local_signal.closed() => {}
    }
}
