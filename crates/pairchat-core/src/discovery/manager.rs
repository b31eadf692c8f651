//! Peer discovery manager
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  DiscoveryManager                                                │
//! │  ├── sockets: HashMap<url, TrackerLink>                          │
//! │  │   └── reader task per rendezvous server                       │
//! │  ├── announcements: HashMap<AnnounceTopic, Announcement>         │
//! │  │   ├── signaling key, re-announce timer                        │
//! │  │   └── offer pool (unacquired offers)                          │
//! │  ├── claimed: HashSet<OfferId>      third-party offers taken     │
//! │  ├── pending: HashMap<OfferId, PendingConnection>                │
//! │  │   └── negotiations past offer/answer, not yet connected       │
//! │  ├── peers: HashMap<PeerId, PeerConnection>                      │
//! │  └── event_tx: broadcast::Sender<DiscoveryEvent>                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All state sits behind one synchronous mutex that is never held across an
//! await point. Network work runs in spawned tasks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{OfferEntry, TrackerMessage};
use super::tracker::TrackerConnector;
use crate::config::DiscoveryConfig;
use crate::crypto::SignalingKey;
use crate::error::{ChatError, ChatResult};
use crate::transport::{NegotiationHandle, PeerConnection, PeerConnector, PeerLink, SignalData};
use crate::types::{AnnounceTopic, OfferId, PeerId, ShareSecret};

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long a negotiation may take to produce its local description.
const SIGNAL_TIMEOUT: Duration = Duration::from_secs(15);

/// How long an accepted offer or answer may take to become a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Events emitted by the discovery manager
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A remote peer finished negotiation and is registered
    PeerConnected {
        connection: PeerConnection,
        topic: AnnounceTopic,
        peer_id: PeerId,
    },
    /// A registered peer connection closed
    PeerDisconnected { peer_id: PeerId },
}

struct TrackerLink {
    id: u64,
    tx: mpsc::Sender<String>,
    reader: JoinHandle<()>,
}

struct PooledOffer {
    handle: NegotiationHandle,
    signal: SignalData,
}

struct Announcement {
    key: SignalingKey,
    interval_secs: u64,
    timer: Option<JoinHandle<()>>,
    offers: HashMap<OfferId, PooledOffer>,
    /// Offers being created right now
    creating: usize,
}

struct PendingConnection {
    topic: AnnounceTopic,
    remote: PeerId,
    offer_owner: PeerId,
    handle: NegotiationHandle,
}

#[derive(Default)]
struct DiscoveryState {
    sockets: HashMap<String, TrackerLink>,
    announcements: HashMap<AnnounceTopic, Announcement>,
    claimed: HashSet<OfferId>,
    pending: HashMap<OfferId, PendingConnection>,
    peers: HashMap<PeerId, PeerConnection>,
    destroyed: bool,
}

struct Inner {
    config: DiscoveryConfig,
    self_id: PeerId,
    trackers: Arc<dyn TrackerConnector>,
    connector: Arc<dyn PeerConnector>,
    state: Mutex<DiscoveryState>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

/// Finds peers sharing a secret through rendezvous servers.
///
/// Cheap to clone; clones share state.
///
/// # Example
///
/// ```ignore
/// let manager = DiscoveryManager::new(config, PeerId::random(), trackers, connector);
/// manager.connect_to_trackers().await;
/// let topic = manager.create_announce(&secret).await?;
/// let mut events = manager.subscribe();
/// ```
#[derive(Clone)]
pub struct DiscoveryManager {
    inner: Arc<Inner>,
}

impl DiscoveryManager {
    pub fn new(
        config: DiscoveryConfig,
        self_id: PeerId,
        trackers: Arc<dyn TrackerConnector>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                self_id,
                trackers,
                connector,
                state: Mutex::new(DiscoveryState::default()),
                event_tx,
            }),
        }
    }

    pub fn self_id(&self) -> &PeerId {
        &self.inner.self_id
    }

    /// Subscribe to peer connect/disconnect events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Ids of all registered peers
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.state.lock().peers.keys().cloned().collect()
    }

    pub fn peer_connection(&self, peer_id: &PeerId) -> Option<PeerConnection> {
        self.inner.state.lock().peers.get(peer_id).cloned()
    }

    pub fn is_announcing(&self, topic: &AnnounceTopic) -> bool {
        self.inner.state.lock().announcements.contains_key(topic)
    }

    /// Number of unacquired offers in a topic's pool
    pub fn offer_pool_len(&self, topic: &AnnounceTopic) -> usize {
        self.inner
            .state
            .lock()
            .announcements
            .get(topic)
            .map_or(0, |a| a.offers.len())
    }

    /// Number of live rendezvous connections
    pub fn tracker_count(&self) -> usize {
        self.inner.state.lock().sockets.len()
    }

    /// Current re-announce period for a topic
    pub fn announce_interval(&self, topic: &AnnounceTopic) -> Option<Duration> {
        self.inner
            .state
            .lock()
            .announcements
            .get(topic)
            .map(|a| Duration::from_secs(a.interval_secs))
    }

    /// Connect to every configured rendezvous server concurrently.
    ///
    /// Returns the number of servers reached. Failures are logged.
    pub async fn connect_to_trackers(&self) -> usize {
        let urls = self.inner.config.tracker_urls.clone();
        let results =
            futures::future::join_all(urls.iter().map(|url| self.reconnect_to_tracker(url))).await;
        results.iter().filter(|r| r.is_ok()).count()
    }

    /// (Re)open the connection to one rendezvous server, replacing any
    /// previous connection to it.
    pub async fn reconnect_to_tracker(&self, url: &str) -> ChatResult<()> {
        self.inner.reconnect_to_tracker(url).await
    }

    /// Start announcing under the topic derived from `secret`.
    ///
    /// Idempotent: while the announcement is live, a second call returns the
    /// same topic without creating another pool or timer.
    pub async fn create_announce(&self, secret: &ShareSecret) -> ChatResult<AnnounceTopic> {
        self.inner.create_announce(secret).await
    }

    /// Publish the current offer pool for `topic` to every rendezvous server.
    pub async fn broadcast_announcement(&self, topic: &AnnounceTopic) -> ChatResult<()> {
        self.inner.broadcast_announcement(topic, None).await
    }

    /// Stop announcing `topic`. Connected peers are not affected.
    pub fn stop_announcing(&self, topic: &AnnounceTopic) {
        self.inner.stop_announcing(topic)
    }

    /// Close everything and clear all state. Safe to call repeatedly.
    pub fn destroy(&self) {
        self.inner.destroy()
    }
}

impl Inner {
    fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    async fn reconnect_to_tracker(self: &Arc<Self>, url: &str) -> ChatResult<()> {
        if self.is_destroyed() {
            return Err(ChatError::InvalidState("discovery manager destroyed".to_string()));
        }

        let socket = match self.trackers.connect(url).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(url, error = %e, "Failed to connect to tracker");
                return Err(e);
            }
        };

        let id = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);
        let mut rx = socket.rx;
        let this = self.clone();
        let reader_url = url.to_string();
        let reader = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                this.handle_message(&reader_url, &text);
            }
            debug!(url = %reader_url, "Tracker connection closed");
            let mut state = this.state.lock();
            if state.sockets.get(&reader_url).is_some_and(|link| link.id == id) {
                state.sockets.remove(&reader_url);
            }
        });

        let topics: Vec<AnnounceTopic> = {
            let mut state = self.state.lock();
            if state.destroyed {
                reader.abort();
                return Err(ChatError::InvalidState("discovery manager destroyed".to_string()));
            }
            let link = TrackerLink {
                id,
                tx: socket.tx,
                reader,
            };
            if let Some(previous) = state.sockets.insert(url.to_string(), link) {
                previous.reader.abort();
            }
            state.announcements.keys().cloned().collect()
        };
        info!(url, "Connected to tracker");

        for topic in topics {
            let _ = self.broadcast_announcement(&topic, Some(url)).await;
        }
        Ok(())
    }

    /// Reconnect configured servers that currently have no connection.
    async fn reconnect_missing(self: &Arc<Self>) {
        let missing: Vec<String> = {
            let state = self.state.lock();
            self.config
                .tracker_urls
                .iter()
                .filter(|url| !state.sockets.contains_key(url.as_str()))
                .cloned()
                .collect()
        };
        if missing.is_empty() {
            return;
        }
        debug!(count = missing.len(), "Reconnecting to trackers");
        futures::future::join_all(missing.iter().map(|url| self.reconnect_to_tracker(url))).await;
    }

    async fn create_announce(self: &Arc<Self>, secret: &ShareSecret) -> ChatResult<AnnounceTopic> {
        let topic = AnnounceTopic::derive(secret, &self.config.app_id, &self.config.protocol_version);

        {
            let mut state = self.state.lock();
            if state.destroyed {
                return Err(ChatError::InvalidState("discovery manager destroyed".to_string()));
            }
            if state.announcements.contains_key(&topic) {
                debug!(%topic, "Already announcing");
                return Ok(topic);
            }
            state.announcements.insert(
                topic.clone(),
                Announcement {
                    key: SignalingKey::derive(secret, &self.config.signaling_namespace),
                    interval_secs: self.config.announce_interval_secs,
                    timer: None,
                    offers: HashMap::new(),
                    creating: 0,
                },
            );
        }
        info!(%topic, "Creating announcement");

        self.top_up_offers(&topic).await;
        self.schedule_announce(&topic);
        self.broadcast_announcement(&topic, None).await?;
        Ok(topic)
    }

    /// (Re)start the periodic announce timer for `topic`.
    fn schedule_announce(self: &Arc<Self>, topic: &AnnounceTopic) {
        let mut state = self.state.lock();
        let Some(announcement) = state.announcements.get_mut(topic) else {
            return;
        };
        let period = Duration::from_secs(announcement.interval_secs.max(1));
        let this = self.clone();
        let timer_topic = topic.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                this.reconnect_missing().await;
                // Replace offers lost to failed negotiations
                this.top_up_offers(&timer_topic).await;
                if this.broadcast_announcement(&timer_topic, None).await.is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = announcement.timer.replace(timer) {
            previous.abort();
        }
    }

    async fn broadcast_announcement(
        self: &Arc<Self>,
        topic: &AnnounceTopic,
        only_url: Option<&str>,
    ) -> ChatResult<()> {
        let (text, sockets) = {
            let state = self.state.lock();
            let announcement = state
                .announcements
                .get(topic)
                .ok_or_else(|| ChatError::InvalidState(format!("not announcing {topic}")))?;

            let mut entries = Vec::with_capacity(announcement.offers.len());
            for (offer_id, offer) in &announcement.offers {
                match announcement.key.seal(&offer.signal.sdp) {
                    Ok(sealed) => entries.push(OfferEntry {
                        offer_id: offer_id.clone(),
                        offer: SignalData {
                            kind: offer.signal.kind,
                            sdp: sealed,
                        },
                    }),
                    Err(e) => warn!(%topic, error = %e, "Failed to seal offer"),
                }
            }

            let text = TrackerMessage::announce(topic, &self.self_id, entries).to_json();
            let sockets: Vec<(String, mpsc::Sender<String>)> = state
                .sockets
                .iter()
                .filter(|(url, _)| only_url.map_or(true, |only| only == url.as_str()))
                .map(|(url, link)| (url.clone(), link.tx.clone()))
                .collect();
            (text, sockets)
        };

        debug!(%topic, trackers = sockets.len(), "Broadcasting announcement");
        for (url, tx) in sockets {
            if tx.send(text.clone()).await.is_err() {
                debug!(%url, "Tracker socket closed during announce");
            }
        }
        Ok(())
    }

    /// Create offers until the pool for `topic` is back at its configured size.
    async fn top_up_offers(self: &Arc<Self>, topic: &AnnounceTopic) {
        let needed = {
            let mut state = self.state.lock();
            let Some(announcement) = state.announcements.get_mut(topic) else {
                return;
            };
            let have = announcement.offers.len() + announcement.creating;
            let needed = self.config.offer_pool_size.saturating_sub(have);
            announcement.creating += needed;
            needed
        };
        if needed == 0 {
            return;
        }

        futures::future::join_all((0..needed).map(|_| self.create_offer(topic))).await;
        debug!(%topic, created = needed, "Offer pool topped up");
    }

    async fn create_offer(self: &Arc<Self>, topic: &AnnounceTopic) {
        let mut negotiation = self.connector.create(true);
        let handle = negotiation.handle();
        let connected = negotiation.take_connected();
        let signal = tokio::time::timeout(SIGNAL_TIMEOUT, handle.local_signal()).await;

        let offer_id = OfferId::random();
        {
            let mut state = self.state.lock();
            let Some(announcement) = state.announcements.get_mut(topic) else {
                handle.destroy();
                return;
            };
            announcement.creating = announcement.creating.saturating_sub(1);
            match signal {
                Ok(Ok(signal)) => {
                    announcement.offers.insert(
                        offer_id.clone(),
                        PooledOffer {
                            handle: handle.clone(),
                            signal,
                        },
                    );
                }
                Ok(Err(e)) => {
                    debug!(%topic, error = %e, "Offer negotiation failed");
                    handle.destroy();
                    return;
                }
                Err(_) => {
                    debug!(%topic, "Offer negotiation timed out");
                    handle.destroy();
                    return;
                }
            }
        }

        if let Some(connected) = connected {
            self.watch_negotiation(offer_id, connected);
        }
    }

    /// Route one inbound rendezvous message. Malformed input is dropped.
    fn handle_message(self: &Arc<Self>, url: &str, text: &str) {
        let Some(msg) = TrackerMessage::from_json(text) else {
            warn!(url, "Dropping malformed tracker message");
            return;
        };

        if let Some(reason) = msg.failure_reason {
            warn!(url, %reason, "Tracker reported failure");
            return;
        }

        let Some(topic) = msg.info_hash else {
            return;
        };
        {
            let state = self.state.lock();
            if state.destroyed || !state.announcements.contains_key(&topic) {
                return;
            }
        }

        if let Some(interval) = msg.interval {
            self.adopt_interval(&topic, interval);
        }

        let Some(peer_id) = msg.peer_id else {
            return;
        };
        if peer_id == self.self_id {
            return;
        }

        match (msg.offer, msg.answer, msg.offer_id) {
            (Some(offer), _, Some(offer_id)) => {
                let this = self.clone();
                let url = url.to_string();
                tokio::spawn(async move {
                    this.handle_remote_offer(&url, topic, peer_id, offer_id, offer)
                        .await;
                });
            }
            (None, Some(answer), Some(offer_id)) => {
                let this = self.clone();
                tokio::spawn(async move {
                    this.handle_answer(topic, peer_id, offer_id, answer).await;
                });
            }
            _ => {}
        }
    }

    fn adopt_interval(self: &Arc<Self>, topic: &AnnounceTopic, interval: u64) {
        {
            let mut state = self.state.lock();
            let Some(announcement) = state.announcements.get_mut(topic) else {
                return;
            };
            if interval <= announcement.interval_secs || interval > self.config.max_announce_interval_secs {
                return;
            }
            announcement.interval_secs = interval;
        }
        info!(%topic, interval, "Adopting tracker announce interval");
        self.schedule_announce(topic);
    }

    async fn handle_remote_offer(
        self: &Arc<Self>,
        url: &str,
        topic: AnnounceTopic,
        remote: PeerId,
        offer_id: OfferId,
        offer: SignalData,
    ) {
        let key = {
            let mut state = self.state.lock();
            if state.peers.contains_key(&remote) || state.claimed.contains(&offer_id) {
                debug!(%remote, %offer_id, "Ignoring offer: already connected or claimed");
                return;
            }
            let Some(announcement) = state.announcements.get(&topic) else {
                return;
            };
            let key = announcement.key.clone();
            state.claimed.insert(offer_id.clone());
            key
        };

        let sdp = match key.open(&offer.sdp) {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!(%remote, %offer_id, error = %e, "Failed to decrypt offer");
                return;
            }
        };

        let mut negotiation = self.connector.create(false);
        let handle = negotiation.handle();
        let Some(connected) = negotiation.take_connected() else {
            return;
        };
        {
            let mut state = self.state.lock();
            if state.destroyed {
                handle.destroy();
                return;
            }
            state.pending.insert(
                offer_id.clone(),
                PendingConnection {
                    topic: topic.clone(),
                    remote: remote.clone(),
                    offer_owner: remote.clone(),
                    handle: handle.clone(),
                },
            );
        }
        self.watch_negotiation(offer_id.clone(), connected);
        self.expire_pending(offer_id.clone());

        let answer = async {
            handle.signal(SignalData { kind: offer.kind, sdp }).await?;
            let answer = tokio::time::timeout(SIGNAL_TIMEOUT, handle.local_signal())
                .await
                .map_err(|_| ChatError::Timeout("answer description".to_string()))??;
            let sealed = key.seal(&answer.sdp)?;
            Ok::<_, ChatError>(SignalData {
                kind: answer.kind,
                sdp: sealed,
            })
        };
        let answer = match answer.await {
            Ok(answer) => answer,
            Err(e) => {
                debug!(%remote, %offer_id, error = %e, "Answering offer failed");
                self.discard_pending(&offer_id);
                return;
            }
        };

        let tx = self.state.lock().sockets.get(url).map(|link| link.tx.clone());
        let Some(tx) = tx else {
            debug!(url, "Tracker gone before answer could be sent");
            self.discard_pending(&offer_id);
            return;
        };
        let text = TrackerMessage::answer(&topic, &self.self_id, &remote, &offer_id, answer).to_json();
        if tx.send(text).await.is_err() {
            self.discard_pending(&offer_id);
            return;
        }
        debug!(%remote, %offer_id, "Sent answer");
    }

    async fn handle_answer(
        self: &Arc<Self>,
        topic: AnnounceTopic,
        remote: PeerId,
        offer_id: OfferId,
        answer: SignalData,
    ) {
        let (key, handle) = {
            let mut state = self.state.lock();
            if state.peers.contains_key(&remote) {
                debug!(%remote, "Ignoring answer: already connected");
                return;
            }
            let Some(announcement) = state.announcements.get_mut(&topic) else {
                return;
            };
            let Some(offer) = announcement.offers.remove(&offer_id) else {
                debug!(%remote, %offer_id, "Ignoring answer: offer claimed or gone");
                return;
            };
            let key = announcement.key.clone();
            state.pending.insert(
                offer_id.clone(),
                PendingConnection {
                    topic: topic.clone(),
                    remote: remote.clone(),
                    offer_owner: self.self_id.clone(),
                    handle: offer.handle.clone(),
                },
            );
            (key, offer.handle)
        };
        self.expire_pending(offer_id.clone());

        let sdp = match key.open(&answer.sdp) {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!(%remote, %offer_id, error = %e, "Failed to decrypt answer");
                self.discard_pending(&offer_id);
                return;
            }
        };
        if let Err(e) = handle.signal(SignalData { kind: answer.kind, sdp }).await {
            debug!(%remote, %offer_id, error = %e, "Completing offer failed");
            self.discard_pending(&offer_id);
        }
    }

    /// Wait for a negotiation to produce a link and register the peer.
    fn watch_negotiation(self: &Arc<Self>, offer_id: OfferId, connected: oneshot::Receiver<PeerLink>) {
        let this = self.clone();
        tokio::spawn(async move {
            match connected.await {
                Ok(link) => this.on_connected(offer_id, link).await,
                Err(_) => {
                    // Negotiation destroyed or failed
                    let mut state = this.state.lock();
                    state.pending.remove(&offer_id);
                    for announcement in state.announcements.values_mut() {
                        announcement.offers.remove(&offer_id);
                    }
                }
            }
        });
    }

    /// Give up on an accepted negotiation that does not connect in time.
    fn expire_pending(self: &Arc<Self>, offer_id: OfferId) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CONNECT_TIMEOUT).await;
            if this.state.lock().pending.contains_key(&offer_id) {
                debug!(%offer_id, "Negotiation timed out");
                this.discard_pending(&offer_id);
            }
        });
    }

    fn discard_pending(&self, offer_id: &OfferId) {
        if let Some(pending) = self.state.lock().pending.remove(offer_id) {
            pending.handle.destroy();
        }
    }

    async fn on_connected(self: &Arc<Self>, offer_id: OfferId, link: PeerLink) {
        let (topic, registered) = {
            let mut state = self.state.lock();
            let Some(pending) = state.pending.remove(&offer_id) else {
                // Torn down while connecting
                link.closed.cancel();
                return;
            };
            let PendingConnection {
                topic,
                remote,
                offer_owner,
                ..
            } = pending;
            let connection = PeerConnection::open(link, remote.clone(), offer_owner);

            let keep_existing = match state.peers.get(&remote) {
                Some(existing) if existing.is_open() => {
                    if prefers_existing(existing.offer_owner(), connection.offer_owner()) {
                        true
                    } else {
                        debug!(%remote, "Replacing connection with preferred duplicate");
                        existing.close();
                        false
                    }
                }
                _ => false,
            };

            if keep_existing {
                debug!(%remote, "Keeping existing connection, closing duplicate");
                connection.close();
                (topic, None)
            } else {
                state.peers.insert(remote.clone(), connection.clone());
                (topic, Some((remote, connection)))
            }
        };
        let Some((remote, connection)) = registered else {
            self.top_up_offers(&topic).await;
            return;
        };

        info!(peer = %remote, %topic, "Peer connected");
        let _ = self.event_tx.send(DiscoveryEvent::PeerConnected {
            connection: connection.clone(),
            topic: topic.clone(),
            peer_id: remote.clone(),
        });

        let this = self.clone();
        tokio::spawn(async move {
            connection.closed().await;
            let removed = {
                let mut state = this.state.lock();
                if state.peers.get(&remote).is_some_and(|c| c.id() == connection.id()) {
                    state.peers.remove(&remote);
                    true
                } else {
                    false
                }
            };
            if removed {
                info!(peer = %remote, "Peer disconnected");
                let _ = this.event_tx.send(DiscoveryEvent::PeerDisconnected { peer_id: remote });
            }
        });

        self.top_up_offers(&topic).await;
    }

    fn stop_announcing(&self, topic: &AnnounceTopic) {
        let Some(announcement) = self.state.lock().announcements.remove(topic) else {
            return;
        };
        if let Some(timer) = announcement.timer {
            timer.abort();
        }
        for offer in announcement.offers.into_values() {
            offer.handle.destroy();
        }
        info!(%topic, "Stopped announcing");
    }

    fn destroy(&self) {
        let state = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            let taken = std::mem::take(&mut *state);
            state.destroyed = true;
            taken
        };

        for (_, link) in state.sockets {
            link.reader.abort();
        }
        for (_, announcement) in state.announcements {
            if let Some(timer) = announcement.timer {
                timer.abort();
            }
            for offer in announcement.offers.into_values() {
                offer.handle.destroy();
            }
        }
        for (_, pending) in state.pending {
            pending.handle.destroy();
        }
        for (_, connection) in state.peers {
            connection.close();
        }
        info!(peer = %self.self_id, "Discovery manager destroyed");
    }
}

/// Between two live connections to one peer, both ends keep the one whose
/// offer came from the smaller peer id.
fn prefers_existing(existing_owner: &PeerId, incoming_owner: &PeerId) -> bool {
    existing_owner <= incoming_owner
}
