//! Wrap/unwrap pipeline stages and inbound fan-out
//!
//! Stages are tasks connected by bounded `mpsc` channels. A stage ends when
//! its input closes and then drops its output, which is how end-of-stream
//! travels down a pipeline.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::envelope::{ChannelEnvelope, ChannelTag};

/// Buffer size of channels between pipeline stages.
pub const STAGE_CAPACITY: usize = 64;

/// Tag a raw chunk as an encoded envelope.
pub fn wrap_chunk(tag: ChannelTag, chunk: &[u8]) -> Option<Bytes> {
    match ChannelEnvelope::new(tag, chunk).encode() {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(e) => {
            debug!(?tag, error = %e, "Failed to encode envelope");
            None
        }
    }
}

/// Return the payload of `frame` if it decodes and carries `tag`.
pub fn unwrap_frame(tag: ChannelTag, frame: &[u8]) -> Option<Bytes> {
    let envelope = ChannelEnvelope::decode(frame).ok()?;
    if envelope.tag() == tag {
        Some(Bytes::from(envelope.message))
    } else {
        None
    }
}

/// Spawn a wrap stage: raw chunks in, tagged frames out.
///
/// The stage stops when `input` closes or `output` is gone.
pub fn spawn_wrap(
    tag: ChannelTag,
    mut input: mpsc::Receiver<Bytes>,
    output: mpsc::Sender<Bytes>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(chunk) = input.recv().await {
            let Some(frame) = wrap_chunk(tag, &chunk) else {
                continue;
            };
            if output.send(frame).await.is_err() {
                break;
            }
        }
        trace!(?tag, "Wrap stage finished");
    })
}

/// Spawn an unwrap stage: transport frames in, matching payloads out.
///
/// Malformed and foreign frames are dropped. Closing `input` closes `output`.
pub fn spawn_unwrap(
    tag: ChannelTag,
    mut input: mpsc::Receiver<Bytes>,
    output: mpsc::Sender<Bytes>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = input.recv().await {
            let Some(payload) = unwrap_frame(tag, &frame) else {
                continue;
            };
            if output.send(payload).await.is_err() {
                break;
            }
        }
        trace!(?tag, "Unwrap stage finished");
    })
}

/// Fan-out of inbound transport frames to every live subscriber.
///
/// Every subscriber sees every frame in arrival order. Dropping a receiver
/// unsubscribes it. After [`FrameBus::close`] new subscribers get an already
/// finished stream.
#[derive(Clone, Default)]
pub struct FrameBus {
    state: Arc<Mutex<BusState>>,
}

#[derive(Default)]
struct BusState {
    subscribers: Vec<mpsc::Sender<Bytes>>,
    closed: bool,
}

impl FrameBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(STAGE_CAPACITY);
        let mut state = self.state.lock();
        if !state.closed {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Deliver one frame to all subscribers.
    pub async fn publish(&self, frame: Bytes) {
        let subscribers: Vec<_> = self.state.lock().subscribers.clone();
        for tx in &subscribers {
            // A closed subscriber is pruned below
            let _ = tx.send(frame.clone()).await;
        }
        self.state.lock().subscribers.retain(|tx| !tx.is_closed());
    }

    /// Drop all subscribers, ending their streams.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::ChannelKind;

    fn tag(idx: u32) -> ChannelTag {
        ChannelTag::new(ChannelKind::UserChannel, idx)
    }

    #[test]
    fn test_unwrap_filters_by_kind_and_index() {
        let frame = wrap_chunk(tag(42), b"payload").unwrap();
        assert_eq!(unwrap_frame(tag(42), &frame).as_deref(), Some(&b"payload"[..]));
        assert!(unwrap_frame(tag(43), &frame).is_none());
        assert!(unwrap_frame(ChannelTag::new(ChannelKind::ControlKeyExchange, 42), &frame).is_none());
    }

    #[test]
    fn test_unwrap_drops_garbage() {
        assert!(unwrap_frame(tag(1), b"\xff\xff\xff\xff\xff\xff").is_none());
    }

    #[tokio::test]
    async fn test_wrap_then_unwrap_pipeline_preserves_order() {
        let (raw_tx, raw_rx) = mpsc::channel(STAGE_CAPACITY);
        let (wire_tx, wire_rx) = mpsc::channel(STAGE_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel(STAGE_CAPACITY);

        spawn_wrap(tag(5), raw_rx, wire_tx);
        spawn_unwrap(tag(5), wire_rx, out_tx);

        for i in 0..10u8 {
            raw_tx.send(Bytes::from(vec![i; 3])).await.unwrap();
        }
        drop(raw_tx);

        let mut received = Vec::new();
        while let Some(chunk) = out_rx.recv().await {
            received.push(chunk[0]);
        }
        assert_eq!(received, (0..10u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_bus_fans_out_and_prunes() {
        let bus = FrameBus::new();
        let mut a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(b);
        bus.publish(Bytes::from_static(b"x")).await;
        assert_eq!(a.recv().await.as_deref(), Some(&b"x"[..]));
        assert_eq!(bus.subscriber_count(), 1);

        bus.close();
        assert!(a.recv().await.is_none());
        assert!(bus.subscribe().recv().await.is_none());
    }
}
