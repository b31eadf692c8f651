//! One two-party conversation
//!
//! ```text
//! ChatSession
//!   ├── DiscoveryManager ── PeerConnected(topic) ──┬─► own engine  (Origin)
//!   │                                              └─► peer engine (Replica)
//!   ├── own log   ── register_feed(own tag)  ─┐
//!   ├── peer log  ── register_feed(peer tag) ─┴─► MessageView ─► MessagesUpdated
//!   └── peer engine status ─────────────────────────────────────► OnlineChanged
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::message::{UserMessage, LOCAL_SENDER};
use crate::config::ChatConfig;
use crate::crypto::{CryptoService, EntryCrypto};
use crate::discovery::{DiscoveryEvent, DiscoveryManager};
use crate::error::{ChatError, ChatResult};
use crate::log::LogOpener;
use crate::sync::{LogRole, SyncEngine, SyncStatus};
use crate::types::{AnnounceTopic, LogAddressState, ParticipantTag, ShareSecret};
use crate::view::{MessageView, ViewEvent, ViewMessage};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Which end of the conversation this node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Participant {
    /// Created the conversation and handed out the secret
    Creator,
    /// Joined with a secret received out-of-band
    Joiner,
}

impl Participant {
    pub fn tag(&self) -> ParticipantTag {
        match self {
            Participant::Creator => ParticipantTag(0),
            Participant::Joiner => ParticipantTag(1),
        }
    }

    /// The other end of the conversation.
    pub fn other(&self) -> Participant {
        match self {
            Participant::Creator => Participant::Joiner,
            Participant::Joiner => Participant::Creator,
        }
    }

    /// Name of the log written by this participant.
    pub fn log_name(&self, topic: &AnnounceTopic) -> String {
        let side = match self {
            Participant::Creator => "creator",
            Participant::Joiner => "joiner",
        };
        format!("{topic}/{side}")
    }
}

/// Events emitted by a [`ChatSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The visible message list changed
    MessagesUpdated,
    /// Synchronization status of the peer's log changed
    OnlineChanged(SyncStatus),
}

struct SessionInner {
    participant: Participant,
    secret: ShareSecret,
    topic: AnnounceTopic,
    config: ChatConfig,
    crypto: Arc<dyn CryptoService>,
    discovery: DiscoveryManager,
    own: SyncEngine,
    peer: SyncEngine,
    view: MessageView,
    event_tx: broadcast::Sender<ChatEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// A conversation with one remote party.
///
/// Cheap to clone; clones share state.
///
/// # Example
///
/// ```ignore
/// let chat = ChatSession::open(secret, Participant::Creator, discovery, opener, config).await?;
/// chat.init().await?;
/// chat.send_message("hello").await?;
/// for msg in chat.messages() {
///     println!("{:?}: {}", msg.participant, msg.text);
/// }
/// ```
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    /// Open the local log and start listening for peers and log activity.
    ///
    /// Nothing is announced until [`connect_to_peers`](Self::connect_to_peers).
    pub async fn open(
        secret: ShareSecret,
        participant: Participant,
        discovery: DiscoveryManager,
        opener: Arc<dyn LogOpener>,
        config: ChatConfig,
    ) -> ChatResult<Self> {
        let topic = AnnounceTopic::derive(
            &secret,
            &config.discovery.app_id,
            &config.discovery.protocol_version,
        );
        let local_id = discovery.self_id().clone();
        let crypto: Arc<dyn CryptoService> = Arc::new(EntryCrypto::derive(&secret));

        let own = SyncEngine::new(
            participant.log_name(&topic),
            LogRole::Origin,
            local_id.clone(),
            LogAddressState::Unresolved,
            opener.clone(),
            config.sync.clone(),
        );
        let peer = SyncEngine::new(
            participant.other().log_name(&topic),
            LogRole::Replica,
            local_id,
            LogAddressState::Unresolved,
            opener,
            config.sync.clone(),
        );
        let view = MessageView::new(crypto.clone());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let own_log = own.initialize(None).await?;
        view.register_feed(own_log, participant.tag()).await;

        let session = Self {
            inner: Arc::new(SessionInner {
                participant,
                secret,
                topic,
                config,
                crypto,
                discovery,
                own,
                peer,
                view,
                event_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        };
        let tasks = vec![
            session.spawn_peer_router(),
            session.spawn_view_forwarder(),
            session.spawn_peer_log_watch(),
        ];
        session.inner.tasks.lock().extend(tasks);

        info!(topic = %session.inner.topic, participant = ?participant, "Chat session opened");
        Ok(session)
    }

    pub fn participant(&self) -> Participant {
        self.inner.participant
    }

    pub fn topic(&self) -> &AnnounceTopic {
        &self.inner.topic
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Synchronization status of the peer's log.
    pub fn online_status(&self) -> SyncStatus {
        self.inner.peer.status()
    }

    /// Engine of the log this node writes.
    pub fn own_engine(&self) -> &SyncEngine {
        &self.inner.own
    }

    /// Engine of the peer's log.
    pub fn peer_engine(&self) -> &SyncEngine {
        &self.inner.peer
    }

    pub fn messages(&self) -> Vec<ViewMessage> {
        self.inner.view.messages()
    }

    /// Show the first page of history and start looking for the peer.
    pub async fn init(&self) -> ChatResult<()> {
        self.inner
            .view
            .update_tail(self.inner.config.view.page_size, true)
            .await?;
        self.connect_to_peers().await?;
        Ok(())
    }

    /// Reach the rendezvous servers and announce this conversation. Every
    /// peer found is registered with both engines.
    pub async fn connect_to_peers(&self) -> ChatResult<AnnounceTopic> {
        let reached = self.inner.discovery.connect_to_trackers().await;
        if reached == 0 {
            warn!(topic = %self.inner.topic, "No rendezvous server reachable, retrying on next announce");
        }
        self.inner.discovery.create_announce(&self.inner.secret).await
    }

    /// Append a message to the local log and show it.
    pub async fn send_message(&self, text: &str) -> ChatResult<UserMessage> {
        let mut message = UserMessage::new(text, LOCAL_SENDER);
        if let Some(last) = self.inner.view.messages().last() {
            message = message.after(last.id.clone());
        }
        let entry = message.seal(self.inner.crypto.as_ref())?;

        let log = self
            .inner
            .own
            .log()
            .ok_or_else(|| ChatError::InvalidState("local log not open".to_string()))?;
        let position = log.append(entry).await?;
        debug!(topic = %self.inner.topic, position, "Message appended");

        self.inner.view.update_head().await?;
        Ok(message)
    }

    /// Page back by `count` older messages.
    pub async fn request_messages(&self, count: usize) -> ChatResult<()> {
        self.inner.view.update_tail(count, false).await
    }

    /// Page back by the configured page size.
    pub async fn request_more_messages(&self) -> ChatResult<()> {
        self.request_messages(self.inner.config.view.page_size).await
    }

    /// Stop announcing, stop both engines and release background tasks.
    ///
    /// The discovery manager is shared and stays up.
    pub fn destroy(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.discovery.stop_announcing(&self.inner.topic);
        self.inner.own.destroy();
        self.inner.peer.destroy();
        info!(topic = %self.inner.topic, "Chat session destroyed");
    }

    /// Register every peer found under this conversation's topic with both
    /// engines.
    fn spawn_peer_router(&self) -> JoinHandle<()> {
        let mut events = self.inner.discovery.subscribe();
        let topic = self.inner.topic.clone();
        let own = self.inner.own.clone();
        let peer = self.inner.peer.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DiscoveryEvent::PeerConnected { connection, topic: t, peer_id }) if t == topic => {
                        info!(%topic, peer = %peer_id, "Peer joined conversation");
                        for engine in [&own, &peer] {
                            if let Err(e) = engine.register_peer(connection.clone(), peer_id.clone()) {
                                warn!(%topic, peer = %peer_id, error = %e, "Failed to register peer");
                            }
                        }
                    }
                    Ok(DiscoveryEvent::PeerConnected { .. }) => {}
                    Ok(DiscoveryEvent::PeerDisconnected { peer_id }) => {
                        debug!(%topic, peer = %peer_id, "Peer left");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%topic, skipped = n, "Discovery events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_view_forwarder(&self) -> JoinHandle<()> {
        let mut events = self.inner.view.subscribe();
        let tx = self.inner.event_tx.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ViewEvent::Ready) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let _ = tx.send(ChatEvent::MessagesUpdated);
                    }
                    Ok(ViewEvent::Error(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Report the peer log's status and show it once it has been opened.
    fn spawn_peer_log_watch(&self) -> JoinHandle<()> {
        let mut status = self.inner.peer.watch_status();
        let peer = self.inner.peer.clone();
        let view = self.inner.view.clone();
        let tag = self.inner.participant.other().tag();
        let tx = self.inner.event_tx.clone();

        tokio::spawn(async move {
            let mut registered = false;
            loop {
                let current = *status.borrow_and_update();
                if !registered {
                    if let Some(log) = peer.log() {
                        view.register_feed(log, tag).await;
                        registered = true;
                        if let Err(e) = view.update_head().await {
                            warn!(error = %e, "Initial refresh of peer log failed");
                        }
                    }
                }
                let _ = tx.send(ChatEvent::OnlineChanged(current));
                if status.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
