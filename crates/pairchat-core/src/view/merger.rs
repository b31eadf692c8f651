use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chat::UserMessage;
use crate::crypto::CryptoService;
use crate::error::ChatResult;
use crate::log::{LogEvent, ReplicatedLog};
use crate::types::ParticipantTag;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A decrypted message ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMessage {
    pub participant: ParticipantTag,
    pub text: String,
    /// The message nonce
    pub id: String,
    /// Sender timestamp in milliseconds
    pub timestamp: i64,
}

/// Events emitted by a [`MessageView`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// The visible list changed or was re-read
    Ready,
    /// A refresh triggered by log activity failed
    Error(String),
}

/// Index of a registered feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedId(usize);

/// Visible window `[start, end)` of one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub start: u64,
    pub end: u64,
    pub tag: ParticipantTag,
}

struct Feed {
    log: Arc<dyn ReplicatedLog>,
    cursor: Cursor,
}

struct Candidate {
    feed: usize,
    position: u64,
    message: UserMessage,
}

struct ViewInner {
    crypto: Arc<dyn CryptoService>,
    /// Cursor arena. Every cursor move and every change to `visible`
    /// happens while this lock is held.
    feeds: tokio::sync::Mutex<Vec<Feed>>,
    visible: RwLock<Vec<ViewMessage>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    event_tx: broadcast::Sender<ViewEvent>,
}

impl Drop for ViewInner {
    fn drop(&mut self) {
        for listener in self.listeners.get_mut().drain(..) {
            listener.abort();
        }
    }
}

/// Merges several logs into one list ordered by sender timestamp.
///
/// Already visible messages are never reordered: older pages are prepended
/// and new arrivals inserted at their sender timestamp.
#[derive(Clone)]
pub struct MessageView {
    inner: Arc<ViewInner>,
}

impl MessageView {
    pub fn new(crypto: Arc<dyn CryptoService>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ViewInner {
                crypto,
                feeds: tokio::sync::Mutex::new(Vec::new()),
                visible: RwLock::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                event_tx,
            }),
        }
    }

    /// Snapshot of the visible messages.
    pub fn messages(&self) -> Vec<ViewMessage> {
        self.inner.visible.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.visible.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Start showing `log` as `tag`. Only entries appended after this call are
    /// visible until [`update_tail`](Self::update_tail) pages back.
    pub async fn register_feed(&self, log: Arc<dyn ReplicatedLog>, tag: ParticipantTag) -> FeedId {
        let mut events = log.subscribe();
        let id = {
            let mut feeds = self.inner.feeds.lock().await;
            let len = log.len();
            feeds.push(Feed {
                log: log.clone(),
                cursor: Cursor { start: len, end: len, tag },
            });
            FeedId(feeds.len() - 1)
        };
        debug!(feed = id.0, participant = tag.0, address = %log.address(), "Registered feed");

        let weak: Weak<ViewInner> = Arc::downgrade(&self.inner);
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_activity() => {}
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = inner.update_head().await {
                    warn!(feed = id.0, error = %e, "View refresh failed");
                    let _ = inner.event_tx.send(ViewEvent::Error(e.to_string()));
                }
            }
        });
        self.inner.listeners.lock().push(listener);
        id
    }

    pub async fn cursor(&self, id: FeedId) -> Option<Cursor> {
        self.inner.feeds.lock().await.get(id.0).map(|f| f.cursor)
    }

    /// Page back by up to `count` older messages across all feeds.
    ///
    /// With `strict`, `count` is the desired total number of visible
    /// messages instead of the number to add.
    pub async fn update_tail(&self, count: usize, strict: bool) -> ChatResult<()> {
        self.inner.update_tail(count, strict).await
    }

    /// Show every entry that arrived since the last refresh.
    pub async fn update_head(&self) -> ChatResult<()> {
        self.inner.update_head().await
    }

    /// Forget all feeds and visible messages.
    pub async fn reset(&self) {
        let mut feeds = self.inner.feeds.lock().await;
        for listener in self.inner.listeners.lock().drain(..) {
            listener.abort();
        }
        feeds.clear();
        self.inner.visible.write().clear();
    }
}

impl ViewInner {
    async fn update_tail(&self, count: usize, strict: bool) -> ChatResult<()> {
        let mut feeds = self.feeds.lock().await;
        let effective = if strict {
            count.saturating_sub(self.visible.read().len())
        } else {
            count
        };

        let mut candidates = Vec::new();
        for (idx, feed) in feeds.iter().enumerate() {
            let end = feed.cursor.start;
            let start = end.saturating_sub(effective as u64);
            self.read_range(idx, feed, start, end, &mut candidates).await?;
        }
        candidates.sort_by_key(|c| c.message.sender_timestamp);

        let skip = candidates.len().saturating_sub(effective);
        let shown: Vec<Candidate> = candidates.into_iter().skip(skip).collect();
        for candidate in &shown {
            let cursor = &mut feeds[candidate.feed].cursor;
            cursor.start = cursor.start.min(candidate.position);
        }

        let older: Vec<ViewMessage> = shown.into_iter().map(|c| to_view(&feeds, c)).collect();
        debug!(added = older.len(), effective, "Paged back");
        {
            let mut visible = self.visible.write();
            visible.splice(0..0, older);
        }
        let _ = self.event_tx.send(ViewEvent::Ready);
        Ok(())
    }

    async fn update_head(&self) -> ChatResult<()> {
        let mut feeds = self.feeds.lock().await;

        let mut candidates = Vec::new();
        for (idx, feed) in feeds.iter().enumerate() {
            let len = feed.log.len();
            self.read_range(idx, feed, feed.cursor.end, len, &mut candidates).await?;
        }
        candidates.sort_by_key(|c| c.message.sender_timestamp);

        for candidate in &candidates {
            let cursor = &mut feeds[candidate.feed].cursor;
            cursor.end = cursor.end.max(candidate.position + 1);
        }

        let newer: Vec<ViewMessage> = candidates.into_iter().map(|c| to_view(&feeds, c)).collect();
        if !newer.is_empty() {
            debug!(added = newer.len(), "Appended new messages");
        }
        {
            let mut visible = self.visible.write();
            for message in newer {
                // Late replicas land at their timestamp; shown messages keep their order
                let at = visible.partition_point(|m| m.timestamp <= message.timestamp);
                visible.insert(at, message);
            }
        }
        let _ = self.event_tx.send(ViewEvent::Ready);
        Ok(())
    }

    /// Decode entries `[start, end)` of one feed into `out`.
    async fn read_range(
        &self,
        idx: usize,
        feed: &Feed,
        start: u64,
        end: u64,
        out: &mut Vec<Candidate>,
    ) -> ChatResult<()> {
        if start >= end {
            return Ok(());
        }
        let entries = feed.log.get_batch(start, end).await?;
        for (offset, entry) in entries.iter().enumerate() {
            out.push(Candidate {
                feed: idx,
                position: start + offset as u64,
                message: UserMessage::open(self.crypto.as_ref(), entry)?,
            });
        }
        Ok(())
    }
}

fn to_view(feeds: &[Feed], candidate: Candidate) -> ViewMessage {
    ViewMessage {
        participant: feeds[candidate.feed].cursor.tag,
        text: candidate.message.text,
        id: candidate.message.nonce,
        timestamp: candidate.message.sender_timestamp,
    }
}
