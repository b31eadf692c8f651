//! Rendezvous-based peer discovery
//!
//! Both parties derive the same [`AnnounceTopic`](crate::AnnounceTopic) from
//! their shared secret and announce themselves on public WebTorrent-style
//! trackers together with a pool of pre-built connection offers. Session
//! descriptions are sealed with the topic's
//! [`SignalingKey`](crate::crypto::SignalingKey) so the tracker only sees the
//! topic and the peer ids.
//!
//! ```text
//!  A                         tracker                         B
//!  │ announce {offers[10]} ───►│                             │
//!  │                           │◄─── announce {offers[10]}   │
//!  │                           │──── offer(A, offer_id) ───► │
//!  │ ◄── answer(B, offer_id) ──│◄─── answer(to A) ────────── │
//!  │ ═══════════════ PeerConnection (A offered) ═══════════  │
//! ```

mod manager;
mod memory;
mod protocol;
mod tracker;

pub use manager::{DiscoveryEvent, DiscoveryManager};
pub use memory::MemoryTracker;
pub use protocol::{OfferEntry, TrackerMessage};
pub use tracker::{TrackerConnector, TrackerSocket, WsTrackerConnector};
