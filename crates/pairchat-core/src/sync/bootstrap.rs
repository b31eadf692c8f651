//! Log address bootstrap over the control channel
//!
//! The origin side repeatedly broadcasts its log address (the "lighthouse");
//! the replica side listens for the first address frame on the same channel.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{ChatError, ChatResult};
use crate::mux::{spawn_unwrap, wrap_chunk, ChannelKind, ChannelTag, STAGE_CAPACITY};
use crate::transport::PeerConnection;
use crate::types::LogAddress;

/// Broadcast `address` on the control channel every `period` until `stop`
/// fires or the connection closes. The first broadcast is immediate.
pub async fn run_lighthouse(
    connection: PeerConnection,
    channel_idx: u32,
    address: LogAddress,
    period: Duration,
    stop: CancellationToken,
) {
    let tag = ChannelTag::new(ChannelKind::ControlKeyExchange, channel_idx);
    let Some(frame) = wrap_chunk(tag, address.as_bytes()) else {
        return;
    };

    let mut ticker = tokio::time::interval(period);
    let mut sent = 0u32;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = connection.closed() => break,
            _ = ticker.tick() => {
                if connection.send(frame.clone()).await.is_err() {
                    break;
                }
                sent += 1;
                trace!(remote = %connection.remote_peer(), channel_idx, "Lighthouse broadcast");
            }
        }
    }
    debug!(remote = %connection.remote_peer(), channel_idx, sent, "Lighthouse stopped");
}

/// Wait for the first valid log address on the control channel.
///
/// The listener is removed as soon as one address is captured.
pub async fn receive_address(
    connection: &PeerConnection,
    channel_idx: u32,
    cancel: &CancellationToken,
) -> ChatResult<LogAddress> {
    let tag = ChannelTag::new(ChannelKind::ControlKeyExchange, channel_idx);
    let (tx, mut rx) = mpsc::channel(STAGE_CAPACITY);
    let listener = spawn_unwrap(tag, connection.subscribe(), tx);

    let result = loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break Err(ChatError::Closed("key exchange cancelled".to_string())),
            payload = rx.recv() => payload,
        };
        match payload {
            Some(payload) => match LogAddress::from_slice(&payload) {
                Ok(address) => break Ok(address),
                Err(e) => debug!(error = %e, "Ignoring malformed lighthouse frame"),
            },
            None => break Err(ChatError::Closed(format!(
                "connection to {} closed during key exchange",
                connection.remote_peer()
            ))),
        }
    };

    listener.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PeerLink;
    use crate::types::PeerId;

    fn pair() -> (PeerConnection, PeerConnection) {
        let (a, b) = PeerLink::pair(STAGE_CAPACITY);
        let origin = PeerId::from("origin");
        let replica = PeerId::from("replica");
        (
            PeerConnection::open(a, replica.clone(), origin.clone()),
            PeerConnection::open(b, origin.clone(), origin),
        )
    }

    #[tokio::test]
    async fn test_replica_learns_address_from_lighthouse() {
        let (origin, replica) = pair();
        let address = LogAddress::random();
        let stop = CancellationToken::new();

        let listener = {
            let replica = replica.clone();
            tokio::spawn(async move { receive_address(&replica, 7, &CancellationToken::new()).await })
        };
        tokio::spawn(run_lighthouse(origin, 7, address, Duration::from_millis(10), stop.clone()));

        assert_eq!(listener.await.unwrap().unwrap(), address);
        stop.cancel();
    }

    #[tokio::test]
    async fn test_other_channel_index_is_ignored() {
        let (origin, replica) = pair();
        let stop = CancellationToken::new();
        tokio::spawn(run_lighthouse(origin, 8, LogAddress::random(), Duration::from_millis(5), stop.clone()));

        let result = tokio::time::timeout(
            Duration::from_millis(60),
            receive_address(&replica, 7, &CancellationToken::new()),
        )
        .await;
        assert!(result.is_err());
        stop.cancel();
    }

    #[tokio::test]
    async fn test_closed_connection_ends_key_exchange() {
        let (origin, replica) = pair();
        origin.close();
        let result = receive_address(&replica, 1, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ChatError::Closed(_))));
    }
}
