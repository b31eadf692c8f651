//! Peer transport negotiation and connections
//!
//! ## Negotiation
//!
//! A [`PeerConnector`] creates a [`Negotiation`] for one side of an
//! offer/answer exchange:
//!
//! ```text
//!  initiator                                     responder
//!  ─────────                                     ─────────
//!  local_signal() ──► offer ─── (tracker) ───► signal(offer)
//!                                              local_signal() ──► answer
//!  signal(answer) ◄── (tracker) ◄─────────────
//!  connected ──► PeerLink                      connected ──► PeerLink
//! ```
//!
//! The connector owns the other half ([`NegotiationDriver`]) and completes it
//! with a [`PeerLink`] once both descriptions are known.
//!
//! ## Connections
//!
//! A completed link is wrapped in a [`PeerConnection`], which fans inbound
//! frames out through a [`FrameBus`](crate::mux::FrameBus) so that every
//! multiplexed channel sees the full inbound stream.

mod connection;
pub mod memory;
mod negotiation;

pub use connection::PeerConnection;
pub use memory::MemoryConnector;
pub use negotiation::{Negotiation, NegotiationDriver, NegotiationHandle, PeerLink};

use serde::{Deserialize, Serialize};

/// Role of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
}

/// Session description exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalData {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub sdp: String,
}

impl SignalData {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Factory for peer transport negotiations.
pub trait PeerConnector: Send + Sync + 'static {
    /// Start a negotiation. The initiator produces an offer, the responder
    /// waits for one.
    fn create(&self, initiator: bool) -> Negotiation;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_data_json_shape() {
        let json = serde_json::to_string(&SignalData::offer("x")).unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"x"}"#);

        let parsed: SignalData = serde_json::from_str(r#"{"type":"answer","sdp":"y"}"#).unwrap();
        assert_eq!(parsed, SignalData::answer("y"));
    }
}
