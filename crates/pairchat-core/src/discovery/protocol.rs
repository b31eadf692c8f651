//! Rendezvous (tracker) wire messages
//!
//! WebTorrent-style JSON text frames. One struct covers both directions; every
//! field is optional on input and omitted on output when unset.
//!
//! ```text
//! client → tracker   {"action":"announce","info_hash","peer_id","numwant","offers":[..]}
//! client → tracker   {"action":"announce","info_hash","peer_id","to_peer_id","offer_id","answer"}
//! tracker → client   {"action":"announce","info_hash","interval"}
//! tracker → client   {"action":"announce","info_hash","peer_id","offer_id","offer"}
//! tracker → client   {"action":"announce","info_hash","peer_id","offer_id","answer"}
//! tracker → client   {"failure reason":"..."}
//! ```

use serde::{Deserialize, Serialize};

use crate::transport::SignalData;
use crate::types::{AnnounceTopic, OfferId, PeerId};

pub const ACTION_ANNOUNCE: &str = "announce";

/// One offer inside an announce request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferEntry {
    pub offer_id: OfferId,
    pub offer: SignalData,
}

/// A rendezvous message in either direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<AnnounceTopic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numwant: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offers: Option<Vec<OfferEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_peer_id: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<OfferId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SignalData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SignalData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(
        rename = "failure reason",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub failure_reason: Option<String>,
}

impl TrackerMessage {
    /// Announce with a batch of offers.
    pub fn announce(topic: &AnnounceTopic, peer_id: &PeerId, offers: Vec<OfferEntry>) -> Self {
        Self {
            action: Some(ACTION_ANNOUNCE.to_string()),
            info_hash: Some(topic.clone()),
            peer_id: Some(peer_id.clone()),
            numwant: Some(offers.len()),
            offers: Some(offers),
            ..Self::default()
        }
    }

    /// Answer to a third-party offer.
    pub fn answer(
        topic: &AnnounceTopic,
        peer_id: &PeerId,
        to_peer_id: &PeerId,
        offer_id: &OfferId,
        answer: SignalData,
    ) -> Self {
        Self {
            action: Some(ACTION_ANNOUNCE.to_string()),
            info_hash: Some(topic.clone()),
            peer_id: Some(peer_id.clone()),
            to_peer_id: Some(to_peer_id.clone()),
            offer_id: Some(offer_id.clone()),
            answer: Some(answer),
            ..Self::default()
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing plain strings and integers cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
