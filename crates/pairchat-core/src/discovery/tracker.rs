//! Rendezvous server connections

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::{ChatError, ChatResult};

const SOCKET_CAPACITY: usize = 64;

/// A text-frame duplex to one rendezvous server.
///
/// Dropping `tx` closes the outbound side; `rx` yields `None` once the server
/// side is gone.
pub struct TrackerSocket {
    pub tx: mpsc::Sender<String>,
    pub rx: mpsc::Receiver<String>,
}

/// Opens rendezvous connections.
pub trait TrackerConnector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, ChatResult<TrackerSocket>>;
}

/// WebSocket connector for WebTorrent-compatible trackers.
#[derive(Debug, Clone, Default)]
pub struct WsTrackerConnector;

impl TrackerConnector for WsTrackerConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, ChatResult<TrackerSocket>> {
        let url = url.to_string();
        Box::pin(async move {
            let (ws_stream, _) = connect_async(url.as_str())
                .await
                .map_err(|e| ChatError::Tracker(format!("{url}: {e}")))?;
            let (mut write, mut read) = ws_stream.split();

            let (out_tx, mut out_rx) = mpsc::channel::<String>(SOCKET_CAPACITY);
            let (in_tx, in_rx) = mpsc::channel::<String>(SOCKET_CAPACITY);

            let writer_url = url.clone();
            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        warn!(url = %writer_url, error = %e, "Tracker write failed");
                        break;
                    }
                }
                let _ = write.close().await;
                debug!(url = %writer_url, "Tracker writer stopped");
            });

            tokio::spawn(async move {
                while let Some(message) = read.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            if in_tx.send(text.to_string()).await.is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(url = %url, error = %e, "Tracker read failed");
                            break;
                        }
                    }
                }
                debug!(url = %url, "Tracker reader stopped");
            });

            Ok(TrackerSocket {
                tx: out_tx,
                rx: in_rx,
            })
        })
    }
}
