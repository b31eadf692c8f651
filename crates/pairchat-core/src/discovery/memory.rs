//! In-process rendezvous server
//!
//! Relays offers and answers between announcing clients the way a
//! WebTorrent tracker does: an announce registers the sender in the topic's
//! swarm and forwards one of its offers to each other member; an answer is
//! routed to its `to_peer_id`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::protocol::{TrackerMessage, ACTION_ANNOUNCE};
use super::tracker::{TrackerConnector, TrackerSocket};
use crate::error::{ChatError, ChatResult};
use crate::types::{AnnounceTopic, PeerId};

const SOCKET_CAPACITY: usize = 64;

#[derive(Default)]
struct TrackerState {
    next_client: u64,
    clients: HashMap<u64, mpsc::Sender<String>>,
    swarms: HashMap<AnnounceTopic, HashMap<PeerId, u64>>,
    unreachable: HashSet<String>,
    announces: usize,
}

/// [`TrackerConnector`] backed by an in-memory relay.
///
/// Clones share the relay. Every URL connects to the same relay unless it
/// was marked unreachable.
#[derive(Clone, Default)]
pub struct MemoryTracker {
    state: Arc<Mutex<TrackerState>>,
    interval_hint: Option<u64>,
    duplicate_answers: bool,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to every announce with an `interval` suggestion.
    pub fn with_interval_hint(mut self, secs: u64) -> Self {
        self.interval_hint = Some(secs);
        self
    }

    /// Relay every answer twice.
    pub fn with_duplicate_answers(mut self) -> Self {
        self.duplicate_answers = true;
        self
    }

    /// Make connections to `url` fail.
    pub fn set_unreachable(&self, url: &str) {
        self.state.lock().unreachable.insert(url.to_string());
    }

    /// Number of announce requests received so far.
    pub fn announce_count(&self) -> usize {
        self.state.lock().announces
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Drop every client connection, as if the server restarted.
    pub fn disconnect_all(&self) {
        let mut state = self.state.lock();
        state.clients.clear();
        state.swarms.clear();
    }

    fn route(&self, client: u64, msg: TrackerMessage) -> Vec<(mpsc::Sender<String>, String)> {
        let mut out = Vec::new();
        if msg.action.as_deref() != Some(ACTION_ANNOUNCE) {
            return out;
        }
        let (Some(topic), Some(peer_id)) = (msg.info_hash.clone(), msg.peer_id.clone()) else {
            return out;
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(own_tx) = state.clients.get(&client).cloned() else {
            return out;
        };
        let swarm = state.swarms.entry(topic.clone()).or_default();
        swarm.insert(peer_id.clone(), client);

        if let (Some(to_peer_id), Some(answer), Some(offer_id)) = (&msg.to_peer_id, &msg.answer, &msg.offer_id) {
            let Some(target) = swarm.get(to_peer_id).copied() else {
                trace!(%to_peer_id, "Answer for unknown peer");
                return out;
            };
            if let Some(tx) = state.clients.get(&target) {
                let forward = TrackerMessage {
                    action: Some(ACTION_ANNOUNCE.to_string()),
                    info_hash: Some(topic),
                    peer_id: Some(peer_id),
                    offer_id: Some(offer_id.clone()),
                    answer: Some(answer.clone()),
                    ..TrackerMessage::default()
                }
                .to_json();
                if self.duplicate_answers {
                    out.push((tx.clone(), forward.clone()));
                }
                out.push((tx.clone(), forward));
            }
            return out;
        }

        state.announces += 1;
        if let Some(interval) = self.interval_hint {
            let reply = TrackerMessage {
                action: Some(ACTION_ANNOUNCE.to_string()),
                info_hash: Some(topic.clone()),
                interval: Some(interval),
                ..TrackerMessage::default()
            };
            out.push((own_tx, reply.to_json()));
        }

        let offers = msg.offers.unwrap_or_default();
        let numwant = msg.numwant.unwrap_or(offers.len()).min(offers.len());
        let others: Vec<u64> = state
            .swarms
            .get(&topic)
            .map(|swarm| {
                swarm
                    .iter()
                    .filter(|(id, _)| **id != peer_id)
                    .map(|(_, client)| *client)
                    .collect()
            })
            .unwrap_or_default();

        for (entry, target) in offers.into_iter().take(numwant).zip(others) {
            let Some(tx) = state.clients.get(&target) else {
                continue;
            };
            let forward = TrackerMessage {
                action: Some(ACTION_ANNOUNCE.to_string()),
                info_hash: Some(topic.clone()),
                peer_id: Some(peer_id.clone()),
                offer_id: Some(entry.offer_id),
                offer: Some(entry.offer),
                ..TrackerMessage::default()
            };
            out.push((tx.clone(), forward.to_json()));
        }
        out
    }

    fn remove_client(&self, client: u64) {
        let mut state = self.state.lock();
        state.clients.remove(&client);
        for swarm in state.swarms.values_mut() {
            swarm.retain(|_, c| *c != client);
        }
    }
}

impl TrackerConnector for MemoryTracker {
    fn connect(&self, url: &str) -> BoxFuture<'static, ChatResult<TrackerSocket>> {
        let tracker = self.clone();
        let url = url.to_string();
        Box::pin(async move {
            if tracker.state.lock().unreachable.contains(&url) {
                return Err(ChatError::Tracker(format!("{url}: unreachable")));
            }

            let (out_tx, mut out_rx) = mpsc::channel::<String>(SOCKET_CAPACITY);
            let (in_tx, in_rx) = mpsc::channel::<String>(SOCKET_CAPACITY);

            let client = {
                let mut state = tracker.state.lock();
                state.next_client += 1;
                let client = state.next_client;
                state.clients.insert(client, in_tx.clone());
                client
            };
            // The relay only keeps a sender; once it forgets the client the
            // client's inbound stream ends.
            drop(in_tx);

            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if !tracker.state.lock().clients.contains_key(&client) {
                        break;
                    }
                    let Some(msg) = TrackerMessage::from_json(&text) else {
                        debug!(client, "Relay ignoring malformed request");
                        continue;
                    };
                    for (tx, forward) in tracker.route(client, msg) {
                        let _ = tx.send(forward).await;
                    }
                }
                tracker.remove_client(client);
                trace!(client, "Relay client gone");
            });

            Ok(TrackerSocket { tx: out_tx, rx: in_rx })
        })
    }
}
